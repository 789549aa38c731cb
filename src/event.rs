use std::fmt;
use tokio::sync::mpsc;

/// Failures the user should hear about. Only writes with no fallback end
/// up here; everything else is logged and absorbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
  CreateFailed { reason: String },
  DeleteFailed { id: String, reason: String },
}

impl fmt::Display for Notice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Notice::CreateFailed { reason } => write!(f, "Could not create record: {}", reason),
      Notice::DeleteFailed { id, reason } => write!(f, "Could not delete {}: {}", id, reason),
    }
  }
}

pub type NoticeSender = mpsc::UnboundedSender<Notice>;
pub type NoticeReceiver = mpsc::UnboundedReceiver<Notice>;

/// Channel the coordinator escalates notices on.
pub fn notice_channel() -> (NoticeSender, NoticeReceiver) {
  mpsc::unbounded_channel()
}
