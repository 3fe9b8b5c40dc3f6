//! Outbound seams: navigation/notification sink and known-subjects provider.
//!
//! The security core never renders anything. It signals "navigate to the
//! authentication entry point" and "show a notice" through [`Notifier`],
//! and asks [`SubjectDirectory`] which identities may log in offline.

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::permissions::Role;

/// Authentication entry point.
pub const AUTH_ROUTE: &str = "/auth";

/// Default landing route for denied navigation.
pub const HOME_ROUTE: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn navigate(&self, route: &str);
    fn notify(&self, notice: Notice);
}

/// Sink for headless use: notices become log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn navigate(&self, route: &str) {
        info!("Navigation requested: {}", route);
    }

    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => info!("{}: {}", notice.title, notice.message),
            NoticeLevel::Warning => warn!("{}: {}", notice.title, notice.message),
            NoticeLevel::Error => error!("{}: {}", notice.title, notice.message),
        }
    }
}

/// A provisionable identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownSubject {
    pub subject_id: String,
    pub role: Role,
}

pub trait SubjectDirectory: Send + Sync {
    fn known_subjects(&self) -> Vec<KnownSubject>;

    fn find(&self, subject_id: &str) -> Option<KnownSubject> {
        self.known_subjects()
            .into_iter()
            .find(|s| s.subject_id == subject_id)
    }
}

/// Fixed list of subjects, from config or the built-in defaults.
#[derive(Debug, Clone)]
pub struct StaticSubjects {
    subjects: Vec<KnownSubject>,
}

impl StaticSubjects {
    pub fn new(subjects: Vec<KnownSubject>) -> Self {
        Self { subjects }
    }
}

impl Default for StaticSubjects {
    /// One subject per role, named after the role.
    fn default() -> Self {
        Self::new(
            Role::ALL
                .into_iter()
                .rev()
                .map(|role| KnownSubject {
                    subject_id: role.as_str().to_string(),
                    role,
                })
                .collect(),
        )
    }
}

impl SubjectDirectory for StaticSubjects {
    fn known_subjects(&self) -> Vec<KnownSubject> {
        self.subjects.clone()
    }
}
