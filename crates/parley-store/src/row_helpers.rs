use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Parse a JSON TEXT column into a typed value, returning CorruptRow on
/// parse failure.
pub fn parse_json<T: DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::delivery::DeliveryStatus;

    #[test]
    fn parse_enum_success() {
        let result: Result<DeliveryStatus, _> = parse_enum("delivered", "messages", "status");
        assert_eq!(result.unwrap(), DeliveryStatus::Delivered);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<DeliveryStatus, _> = parse_enum("INVALID", "messages", "status");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "messages", column: "status", .. })
        ));
    }

    #[test]
    fn parse_json_success() {
        let result: Vec<String> = parse_json(r#"["user_a","user_b"]"#, "chats", "participants").unwrap();
        assert_eq!(result, vec!["user_a", "user_b"]);
    }

    #[test]
    fn parse_json_failure() {
        let result: Result<Vec<String>, _> = parse_json("not valid json", "chats", "participants");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "chats", column: "participants", .. })
        ));
    }
}
