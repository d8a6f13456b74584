use notify::EventKind;
use notify::event::ModifyKind;
use std::fmt;
use std::path::PathBuf;

/// Kind of change reported for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Write,
    Remove,
    Rename,
}

impl OperationKind {
    /// Map a native notification kind; access and metadata-only changes map to `None`.
    ///
    /// `Write` means data modification and fires once per write syscall, so a
    /// file written in several chunks yields several `Write`s. The close-after-write
    /// notification (`Access(Close(Write))`) is an access event and maps to `None`.
    pub fn from_notify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Create),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Rename),
            EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => Some(Self::Write),
            EventKind::Remove(_) => Some(Self::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Write => "write",
            Self::Remove => "remove",
            Self::Rename => "rename",
        };
        f.write_str(name)
    }
}

/// One filesystem notification for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: OperationKind,
    pub path: PathBuf,
}

impl ChangeEvent {
    pub fn new(kind: OperationKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Split a native event into one change per path, in the order reported.
    pub fn from_notify(event: notify::Event) -> Vec<Self> {
        let Some(kind) = OperationKind::from_notify(&event.kind) else {
            return Vec::new();
        };
        event
            .paths
            .into_iter()
            .map(|path| Self { kind, path })
            .collect()
    }
}
