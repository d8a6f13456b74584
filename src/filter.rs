use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::event::{ChangeEvent, OperationKind};

/// Operation kinds that trigger an upload by default
///
/// Creates carry no content yet, so only writes qualify.
pub fn default_allowed_kinds() -> HashSet<OperationKind> {
    HashSet::from([OperationKind::Write])
}

/// Whether `event` should be forwarded
pub fn filter(event: &ChangeEvent, allowed: &HashSet<OperationKind>) -> bool {
    allowed.contains(&event.kind)
}

/// Counters for one router run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub received: u64,
    pub forwarded: u64,
}

/// Forward allowed events from `rx` to `tx` in arrival order
///
/// Sending waits for room downstream, so a slow consumer stalls the source
/// rather than losing events. Returns when either side closes.
pub async fn route(
    mut rx: mpsc::Receiver<ChangeEvent>,
    tx: mpsc::Sender<ChangeEvent>,
    allowed: HashSet<OperationKind>,
) -> RouteStats {
    let mut stats = RouteStats::default();

    while let Some(event) = rx.recv().await {
        stats.received += 1;

        if !filter(&event, &allowed) {
            trace!("Dropping {} event for {}", event.kind, event.path.display());
            continue;
        }

        if tx.send(event).await.is_err() {
            debug!("Dispatcher gone, router stopping");
            break;
        }
        stats.forwarded += 1;
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_uses_allow_list() {
        let allowed = default_allowed_kinds();
        assert!(filter(&ChangeEvent::new(OperationKind::Write, "a"), &allowed));
        assert!(!filter(&ChangeEvent::new(OperationKind::Create, "a"), &allowed));
        assert!(!filter(&ChangeEvent::new(OperationKind::Remove, "a"), &allowed));
        assert!(!filter(&ChangeEvent::new(OperationKind::Rename, "a"), &allowed));

        let custom = HashSet::from([OperationKind::Create, OperationKind::Rename]);
        assert!(filter(&ChangeEvent::new(OperationKind::Create, "a"), &custom));
        assert!(!filter(&ChangeEvent::new(OperationKind::Write, "a"), &custom));
    }

    #[tokio::test]
    async fn test_route_forwards_only_allowed_in_order() {
        let kinds = [
            OperationKind::Create,
            OperationKind::Write,
            OperationKind::Remove,
            OperationKind::Write,
            OperationKind::Rename,
            OperationKind::Write,
        ];
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);

        for (i, kind) in kinds.iter().enumerate() {
            in_tx
                .send(ChangeEvent::new(*kind, format!("/watch/{}", i)))
                .await
                .unwrap();
        }
        drop(in_tx);

        let stats = route(in_rx, out_tx, default_allowed_kinds()).await;
        assert_eq!(stats.received, 6);
        assert_eq!(stats.forwarded, 3);

        let mut paths = Vec::new();
        while let Some(event) = out_rx.recv().await {
            assert_eq!(event.kind, OperationKind::Write);
            paths.push(event.path.to_string_lossy().to_string());
        }
        assert_eq!(paths, vec!["/watch/1", "/watch/3", "/watch/5"]);
    }

    #[tokio::test]
    async fn test_route_blocks_instead_of_dropping() {
        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let router = tokio::spawn(route(in_rx, out_tx, default_allowed_kinds()));

        for i in 0..5 {
            in_tx
                .send(ChangeEvent::new(OperationKind::Write, format!("{}", i)))
                .await
                .unwrap();
        }
        drop(in_tx);

        // Consumer is slow: give the router time to fill the single slot.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!router.is_finished());

        let mut received = 0;
        while out_rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 5);

        let stats = router.await.unwrap();
        assert_eq!(stats.forwarded, 5);
    }
}
