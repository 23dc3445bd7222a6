//! Dict protocol commands
//!
//! Each request is one line. The first character selects the command, the
//! rest is tab-separated.

/// Dict protocol command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictCommand {
    /// H<version>... - Handshake, never answered
    Hello,
    /// L<key>\t<user> - Look up a single key
    Lookup { key: String, user: String },
    /// I... - Iterate keys
    Iterate,
    /// B<txn>\t<user> - Begin a transaction for a mailbox
    Begin { txn: String, user: String },
    /// S<txn>\t<key>\t<value> - Set a key inside a transaction
    Set {
        txn: String,
        key: String,
        value: String,
    },
    /// C<txn> - Commit
    Commit { txn: String },
    /// R<txn> - Rollback
    Rollback { txn: String },

    Unknown { line: String },
}

/// Dict protocol line parser
pub struct DictParser;

impl DictParser {
    /// Parse one request line, without its terminator
    pub fn parse(line: &str) -> DictCommand {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut chars = line.chars();
        let Some(cmd) = chars.next() else {
            return DictCommand::Unknown {
                line: String::new(),
            };
        };
        let args: Vec<&str> = chars.as_str().split('\t').collect();
        let arg = |i: usize| args.get(i).copied().unwrap_or_default().to_string();

        match cmd {
            'H' => DictCommand::Hello,
            'L' => DictCommand::Lookup {
                key: arg(0),
                user: arg(1),
            },
            'I' => DictCommand::Iterate,
            'B' => DictCommand::Begin {
                txn: arg(0),
                user: arg(1),
            },
            'S' if args.len() >= 2 => DictCommand::Set {
                txn: arg(0),
                key: arg(1),
                value: arg(2),
            },
            'C' => DictCommand::Commit { txn: arg(0) },
            'R' => DictCommand::Rollback { txn: arg(0) },
            _ => DictCommand::Unknown {
                line: line.to_string(),
            },
        }
    }
}
