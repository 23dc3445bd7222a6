//! Dict protocol responses

/// Dict protocol response builder
pub struct DictResponse;

impl DictResponse {
    /// Successful lookup or commit
    pub fn ok(value: &str) -> String {
        format!("O{}\n", value)
    }

    /// Lookup miss
    pub fn not_found() -> String {
        "N\n".to_string()
    }

    /// Commit of a transaction with an unhandled set
    pub fn fail() -> String {
        "F\n".to_string()
    }

    /// Iteration without results
    pub fn empty_iteration() -> String {
        "\n".to_string()
    }
}
