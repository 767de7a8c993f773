//! Finding reporters.
//!
//! Conflict detection runs once, parameterized by a [`Reporter`]. In
//! [`ReportMode::FailFast`] the first blocking finding ends the run with an
//! error; in [`ReportMode::Collect`] every finding is recorded and the run
//! continues. Warnings are always recorded.

use prearc_types::{Conflict, Notice, NoticeKind};

use crate::error::{MergeError, MergeResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportMode {
    FailFast,
    Collect,
}

#[derive(Clone, Debug)]
pub struct Reporter {
    mode: ReportMode,
    notices: Vec<Notice>,
}

impl Reporter {
    pub fn new(mode: ReportMode) -> Self {
        Self {
            mode,
            notices: Vec::new(),
        }
    }

    pub fn fail_fast() -> Self {
        Self::new(ReportMode::FailFast)
    }

    pub fn collect() -> Self {
        Self::new(ReportMode::Collect)
    }

    pub fn mode(&self) -> ReportMode {
        self.mode
    }

    /// A blocking failure. `error` is what fail-fast callers see.
    pub fn failure(&mut self, notice: Notice, error: impl FnOnce() -> MergeError) -> MergeResult<()> {
        match self.mode {
            ReportMode::FailFast => Err(error()),
            ReportMode::Collect => {
                self.notices.push(notice);
                Ok(())
            }
        }
    }

    pub fn conflict(&mut self, conflict: Conflict) -> MergeResult<()> {
        let notice = conflict.to_notice();
        match self.mode {
            ReportMode::FailFast => Err(MergeError::Conflict(vec![notice])),
            ReportMode::Collect => {
                self.notices.push(notice);
                Ok(())
            }
        }
    }

    pub fn warning(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn has_blocking(&self) -> bool {
        self.notices.iter().any(Notice::is_blocking)
    }

    /// The recorded notices, one per code, ascending by code. Repeated
    /// findings of one code are folded into a single notice carrying the
    /// most severe kind and every message.
    pub fn finish(self) -> Vec<Notice> {
        let mut notices = self.notices;
        notices.sort();
        let mut folded: Vec<Notice> = Vec::with_capacity(notices.len());
        for notice in notices {
            match folded.last_mut() {
                Some(last) if last.code == notice.code => {
                    if severity(notice.kind) > severity(last.kind) {
                        last.kind = notice.kind;
                    }
                    last.message.push_str("; ");
                    last.message.push_str(&notice.message);
                }
                _ => folded.push(notice),
            }
        }
        folded
    }
}

fn severity(kind: NoticeKind) -> u8 {
    match kind {
        NoticeKind::Warning => 0,
        NoticeKind::Conflict => 1,
        NoticeKind::Failure => 2,
    }
}
