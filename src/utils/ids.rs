use uuid::Uuid;

/// `prefix_<uuid>`, or a bare v4 UUID when the prefix is empty.
pub fn generate_id(prefix: &str) -> String {
    let id = Uuid::new_v4();
    if prefix.is_empty() {
        id.to_string()
    } else {
        format!("{prefix}_{id}")
    }
}
