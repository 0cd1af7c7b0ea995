/// Configuration management
use crate::error::{ChatError, Result};
use crate::store::TreePath;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_CONVERSATIONS_ROOT: &str = "conversations";
const DEFAULT_USERS_ROOT: &str = "users";

/// Store layout and local persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Top-level node holding every conversation
    pub conversations_root: String,

    /// Top-level node holding user profiles
    pub users_root: String,

    /// Optional data directory; when set the in-process store persists to sled
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            conversations_root: DEFAULT_CONVERSATIONS_ROOT.to_string(),
            users_root: DEFAULT_USERS_ROOT.to_string(),
            data_dir: None,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    config.data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--conversations-root" => {
                    let name = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--conversations-root requires a name".to_string())
                    })?;
                    config.conversations_root = name.clone();
                    i += 2;
                }
                "--users-root" => {
                    let name = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--users-root requires a name".to_string())
                    })?;
                    config.users_root = name.clone();
                    i += 2;
                }
                other => {
                    return Err(ChatError::Config(format!(
                        "Unknown argument '{}'. Usage: {} [--data-dir <path>] [--conversations-root <name>] [--users-root <name>]",
                        other,
                        args.first().map(String::as_str).unwrap_or("chatsync")
                    )));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(dir) = std::env::var("CHATSYNC_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(root) = std::env::var("CHATSYNC_CONVERSATIONS_ROOT") {
            config.conversations_root = root;
        }
        if let Ok(root) = std::env::var("CHATSYNC_USERS_ROOT") {
            config.users_root = root;
        }

        config.validate()?;
        Ok(config)
    }

    /// Roots must be single, distinct path segments
    pub fn validate(&self) -> Result<()> {
        for (flag, root) in [
            ("conversations root", &self.conversations_root),
            ("users root", &self.users_root),
        ] {
            if root.is_empty() || root.contains('/') {
                return Err(ChatError::Config(format!(
                    "{} must be a single non-empty path segment, got '{}'",
                    flag, root
                )));
            }
        }
        if self.conversations_root == self.users_root {
            return Err(ChatError::Config(
                "conversations root and users root must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn conversations_path(&self) -> TreePath {
        TreePath::root().child(&self.conversations_root)
    }

    pub fn conversation_path(&self, conversation_id: &str) -> TreePath {
        self.conversations_path().child(conversation_id)
    }

    pub fn participants_path(&self, conversation_id: &str) -> TreePath {
        self.conversation_path(conversation_id).child("participants")
    }

    pub fn participant_path(&self, conversation_id: &str, participant_id: &str) -> TreePath {
        self.participants_path(conversation_id).child(participant_id)
    }

    pub fn messages_path(&self, conversation_id: &str) -> TreePath {
        self.conversation_path(conversation_id).child("messages")
    }

    pub fn message_path(&self, conversation_id: &str, message_id: &str) -> TreePath {
        self.messages_path(conversation_id).child(message_id)
    }

    pub fn users_path(&self) -> TreePath {
        TreePath::root().child(&self.users_root)
    }

    pub fn user_path(&self, uid: &str) -> TreePath {
        self.users_path().child(uid)
    }

    /// Ids become single path segments: non-empty, no `/`
    pub fn check_id(kind: &str, id: &str) -> Result<()> {
        if id.is_empty() || id.contains('/') {
            return Err(ChatError::InvalidArgument(format!("invalid {} '{}'", kind, id)));
        }
        Ok(())
    }

    /// Nested field used to select conversations a participant still belongs to
    pub fn membership_field(participant_id: &str) -> TreePath {
        TreePath::root()
            .child("participants")
            .child(participant_id)
            .child("member")
    }
}
