//! Heuristic pre-spawn screening of script content.
//!
//! The screener is a pure function over script text and the configured
//! capability flags. Reading the script is the coordinator's job.

mod patterns;
mod screen;

pub use screen::screen;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    DestructiveDelete,
    DiskFormat,
    AccountManipulation,
    RegistryModification,
    Shutdown,
    DownloadExecute,
    EncodedCommand,
    Obfuscation,
    NetworkAccess,
    FileSystemAccess,
    RegistryAccess,
    EnvironmentAccess,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DestructiveDelete => "destructive_delete",
            Self::DiskFormat => "disk_format",
            Self::AccountManipulation => "account_manipulation",
            Self::RegistryModification => "registry_modification",
            Self::Shutdown => "shutdown",
            Self::DownloadExecute => "download_execute",
            Self::EncodedCommand => "encoded_command",
            Self::Obfuscation => "obfuscation",
            Self::NetworkAccess => "network_access",
            Self::FileSystemAccess => "file_system_access",
            Self::RegistryAccess => "registry_access",
            Self::EnvironmentAccess => "environment_access",
        }
    }

    /// Capability findings are only issues because the configuration forbids them.
    pub fn is_capability(&self) -> bool {
        matches!(
            self,
            Self::NetworkAccess
                | Self::FileSystemAccess
                | Self::RegistryAccess
                | Self::EnvironmentAccess
        )
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::DestructiveDelete => {
                "Scope deletions to explicit paths inside the working directory and drop recursive force flags"
            }
            Self::DiskFormat => "Disk formatting and raw device writes must be performed manually",
            Self::AccountManipulation => {
                "Manage user accounts and shares through your provisioning tooling, not ad-hoc scripts"
            }
            Self::RegistryModification => {
                "Apply registry changes through reviewed policy packages instead of scripts"
            }
            Self::Shutdown => "Remove shutdown/reboot commands; schedule restarts outside the runner",
            Self::DownloadExecute => {
                "Download artifacts to disk, verify their checksum, then execute them explicitly"
            }
            Self::EncodedCommand => "Replace encoded command invocations with readable script text",
            Self::Obfuscation => "Remove encoded or obfuscated content so the script can be reviewed",
            Self::NetworkAccess => {
                "Enable securityOptions.allowNetworkAccess if this script legitimately needs the network"
            }
            Self::FileSystemAccess => {
                "Enable securityOptions.allowFileSystemAccess if this script must write files"
            }
            Self::RegistryAccess => {
                "Enable securityOptions.allowRegistryAccess if this script must read the registry"
            }
            Self::EnvironmentAccess => {
                "Enable securityOptions.allowEnvironmentAccess or pass values as parameters"
            }
        }
    }
}

impl std::fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIssue {
    pub category: IssueCategory,
    /// 1-based line number in the screened content.
    pub line: usize,
    pub message: String,
}

impl SecurityIssue {
    pub fn new(category: IssueCategory, line: usize, message: impl Into<String>) -> Self {
        Self {
            category,
            line,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SecurityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {} [{}]", self.line, self.message, self.category)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityResult {
    pub safe: bool,
    pub issues: Vec<SecurityIssue>,
    pub recommendations: Vec<String>,
}

impl SecurityResult {
    pub fn from_issues(issues: Vec<SecurityIssue>) -> Self {
        let mut recommendations: Vec<String> = Vec::new();
        for issue in &issues {
            let rec = issue.category.recommendation();
            if !recommendations.iter().any(|r| r == rec) {
                recommendations.push(rec.to_string());
            }
        }
        Self {
            safe: issues.is_empty(),
            issues,
            recommendations,
        }
    }

    pub fn has_category(&self, category: IssueCategory) -> bool {
        self.issues.iter().any(|i| i.category == category)
    }
}
