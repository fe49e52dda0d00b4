use rusqlite::Connection;

pub(crate) fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS addon (
          id TEXT PRIMARY KEY,
          package TEXT NOT NULL,
          code TEXT NOT NULL,
          location TEXT NOT NULL DEFAULT '',
          keyword TEXT NOT NULL DEFAULT '',
          description TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS addon_bind (
          keyword TEXT PRIMARY KEY,
          id TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_addon_bind_id ON addon_bind(id);
        CREATE TABLE IF NOT EXISTS task (
          id TEXT PRIMARY KEY,
          package TEXT NOT NULL,
          code TEXT NOT NULL,
          location TEXT NOT NULL DEFAULT '',
          description TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS schedule (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          task_id TEXT NOT NULL,
          target TEXT NOT NULL,
          spec TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_schedule_task ON schedule(task_id);
        CREATE TABLE IF NOT EXISTS lock_record (
          id TEXT PRIMARY KEY,
          version INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS msg_history (
          msg_id TEXT PRIMARY KEY,
          gid TEXT NOT NULL DEFAULT '',
          group_name TEXT NOT NULL DEFAULT '',
          uid TEXT NOT NULL DEFAULT '',
          username TEXT NOT NULL DEFAULT '',
          msg_type INTEGER NOT NULL DEFAULT 0,
          content TEXT NOT NULL DEFAULT '',
          time INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_msg_history_gid ON msg_history(gid);
        CREATE TABLE IF NOT EXISTS keyword_rule (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          keyword TEXT NOT NULL,
          rule_type INTEGER NOT NULL,
          setting TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_keyword_rule_keyword ON keyword_rule(keyword);
        "#,
    )
}
