//! Per-group keyword blocking rules.
//!
//! A group scoped rule is stored twice, once keyed by group id and once by
//! group name, so it survives either identifier changing across logins.

use rusqlite::{Connection, params};

use crate::error::StoreResult;

/// Rule type for group scoped blocking.
pub const RULE_GROUP: i64 = 1;

/// Blocks `keyword` in the given group.
pub fn block_for_group(
    conn: &Connection,
    keyword: &str,
    gid: &str,
    group_name: &str,
) -> StoreResult<()> {
    for setting in [group_name, gid] {
        conn.execute(
            "INSERT INTO keyword_rule (keyword, rule_type, setting) VALUES (?1, ?2, ?3)",
            params![keyword, RULE_GROUP, setting],
        )?;
    }
    Ok(())
}

/// Lifts a block on `keyword` in the given group. Returns the rows removed.
pub fn unblock_for_group(
    conn: &Connection,
    keyword: &str,
    gid: &str,
    group_name: &str,
) -> StoreResult<usize> {
    Ok(conn.execute(
        "DELETE FROM keyword_rule WHERE keyword = ?1 AND (setting = ?2 OR setting = ?3)",
        params![keyword, gid, group_name],
    )?)
}

/// Returns `true` if `keyword` is blocked in the given group.
///
/// Group names compare case-insensitively.
pub fn is_blocked(
    conn: &Connection,
    keyword: &str,
    gid: &str,
    group_name: &str,
) -> StoreResult<bool> {
    let mut stmt =
        conn.prepare("SELECT rule_type, setting FROM keyword_rule WHERE keyword = ?1")?;
    let rules = stmt
        .query_map([keyword], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rules.iter().any(|(rule_type, setting)| {
        *rule_type == RULE_GROUP
            && (setting.eq_ignore_ascii_case(group_name) || setting.eq_ignore_ascii_case(gid))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[test]
    fn test_block_is_group_scoped() {
        let store = Store::open_in_memory().unwrap();
        store
            .read(|c| block_for_group(c, "抽奖", "g1", "Family"))
            .unwrap();

        assert!(store.read(|c| is_blocked(c, "抽奖", "g1", "")).unwrap());
        assert!(store.read(|c| is_blocked(c, "抽奖", "gx", "family")).unwrap());
        assert!(!store.read(|c| is_blocked(c, "抽奖", "g2", "Work")).unwrap());
        assert!(!store.read(|c| is_blocked(c, "天气", "g1", "Family")).unwrap());

        assert_eq!(
            store
                .read(|c| unblock_for_group(c, "抽奖", "g1", "Family"))
                .unwrap(),
            2
        );
        assert!(!store.read(|c| is_blocked(c, "抽奖", "g1", "Family")).unwrap());
    }
}
