//! Inbound message history.

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// One recorded inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub msg_id: String,
    pub gid: String,
    pub group_name: String,
    pub uid: String,
    pub username: String,
    pub msg_type: i32,
    pub content: String,
    pub time: i64,
}

/// Returns `true` if `msg_id` was already recorded.
pub fn contains(conn: &Connection, msg_id: &str) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM msg_history WHERE msg_id = ?1 LIMIT 1",
            [msg_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Records a message. Returns `false` if the id was already present.
pub fn record(conn: &Connection, msg: &MessageRecord) -> StoreResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO msg_history
           (msg_id, gid, group_name, uid, username, msg_type, content, time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            msg.msg_id,
            msg.gid,
            msg.group_name,
            msg.uid,
            msg.username,
            msg.msg_type,
            msg.content,
            msg.time
        ],
    )?;
    Ok(inserted > 0)
}

/// Number of recorded messages for a group.
pub fn count_for_group(conn: &Connection, gid: &str) -> StoreResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM msg_history WHERE gid = ?1",
        [gid],
        |r| r.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[test]
    fn test_record_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let msg = MessageRecord {
            msg_id: "m1".into(),
            gid: "g".into(),
            content: "hello".into(),
            ..Default::default()
        };
        assert!(!store.read(|c| contains(c, "m1")).unwrap());
        assert!(store.read(|c| record(c, &msg)).unwrap());
        assert!(!store.read(|c| record(c, &msg)).unwrap());
        assert!(store.read(|c| contains(c, "m1")).unwrap());
        assert_eq!(store.read(|c| count_for_group(c, "g")).unwrap(), 1);
    }
}
