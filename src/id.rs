use uuid::Uuid;

/// Prefix carried by ids that exist only locally, before the store has
/// acknowledged the create.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Generates a client-side placeholder id. UUIDv7 keeps ids from two
/// back-to-back creates distinct even within the same millisecond.
pub fn new_temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::now_v7())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Id assigned by the store backends on create.
pub fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn temp_ids_do_not_collide_in_a_tight_loop() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_temp_id()).collect();
        assert_eq!(ids.len(), 10_000);
        assert!(ids.iter().all(|id| is_temp_id(id)));
    }

    #[test]
    fn document_ids_are_not_temporary() {
        let id = new_document_id();
        assert!(!is_temp_id(&id));
        assert_eq!(id.len(), 32);
    }
}
