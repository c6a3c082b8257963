use crate::Database;
use crate::models::{
    UserRow, decode_enum, decode_opt_ts, decode_opt_uuid, decode_ts, decode_uuid, encode_ts,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;
use wadmin_types::models::{
    FeedbackStatus, Group, Instance, InstanceStatus, LogKind, Message, SystemLog, UserFeedback,
};

const INSTANCE_COLUMNS: &str =
    "id, name, status, qr_code, phone_number, user_id, created_at, updated_at, last_connected_at";
const GROUP_COLUMNS: &str =
    "id, group_id, name, invite_code, is_member, instance_id, user_id, joined_at, created_at";
const MESSAGE_COLUMNS: &str =
    "id, text, target, is_group, instance_id, user_id, status, sent_at, error, created_at";
const LOG_COLUMNS: &str = "id, kind, message, details, user_id, instance_id, created_at";
const FEEDBACK_COLUMNS: &str = "id, user_id, message, kind, status, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, is_admin) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, is_admin),
            )?;
            Ok(())
        })
    }

    /// Insert the bootstrap admin, but only while the users table is empty.
    /// Returns false once any account exists.
    pub fn create_first_user(&self, id: &str, username: &str, password_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "INSERT INTO users (id, username, password, is_admin)
                 SELECT ?1, ?2, ?3, 1
                 WHERE NOT EXISTS (SELECT 1 FROM users)",
                (id, username, password_hash),
            )?;
            Ok(n > 0)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    // -- Instances --

    pub fn insert_instance(&self, instance: &Instance) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO instances (id, name, status, qr_code, phone_number, user_id, created_at, updated_at, last_connected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    instance.id.to_string(),
                    instance.name,
                    instance.status.as_str(),
                    instance.qr_code,
                    instance.phone_number,
                    instance.user_id.to_string(),
                    encode_ts(&instance.created_at),
                    encode_ts(&instance.updated_at),
                    instance.last_connected_at.as_ref().map(encode_ts),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_instance(&self, id: Uuid) -> Result<Option<Instance>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?1");
            conn.query_row(&sql, [id.to_string()], instance_from_row).optional()
        })
    }

    pub fn instance_name_exists(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM instances WHERE name = ?1",
                [name],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Newest first. Returns the page plus the total row count for the owner.
    pub fn list_instances(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Instance>, u64)> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {INSTANCE_COLUMNS} FROM instances
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user_id.to_string(), limit, offset],
                    instance_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let total = count(conn, "SELECT COUNT(*) FROM instances WHERE user_id = ?1", &user_id)?;
            Ok((rows, total))
        })
    }

    /// Persists a status transition. `last_connected_at` is only written when
    /// `Some`, so earlier connection stamps survive later disconnects.
    pub fn update_instance_status(
        &self,
        id: Uuid,
        status: InstanceStatus,
        updated_at: DateTime<Utc>,
        last_connected_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Instance>> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE instances
                 SET status = ?2,
                     updated_at = ?3,
                     last_connected_at = COALESCE(?4, last_connected_at)
                 WHERE id = ?1",
                rusqlite::params![
                    id.to_string(),
                    status.as_str(),
                    encode_ts(&updated_at),
                    last_connected_at.as_ref().map(encode_ts),
                ],
            )?;
            let sql = format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?1");
            conn.query_row(&sql, [id.to_string()], instance_from_row).optional()
        })
    }

    pub fn update_instance_qr(
        &self,
        id: Uuid,
        qr_code: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Instance>> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE instances SET qr_code = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id.to_string(), qr_code, encode_ts(&updated_at)],
            )?;
            let sql = format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?1");
            conn.query_row(&sql, [id.to_string()], instance_from_row).optional()
        })
    }

    pub fn update_instance_phone(
        &self,
        id: Uuid,
        phone_number: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Instance>> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE instances SET phone_number = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id.to_string(), phone_number, encode_ts(&updated_at)],
            )?;
            let sql = format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?1");
            conn.query_row(&sql, [id.to_string()], instance_from_row).optional()
        })
    }

    pub fn delete_instance(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM instances WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }

    pub fn count_instances(&self, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            count(conn, "SELECT COUNT(*) FROM instances WHERE user_id = ?1", &user_id)
        })
    }

    pub fn count_connected_instances(&self, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            count(
                conn,
                "SELECT COUNT(*) FROM instances WHERE user_id = ?1 AND status = 'connected'",
                &user_id,
            )
        })
    }

    // -- Groups --

    pub fn insert_group(&self, group: &Group) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO groups (id, group_id, name, invite_code, is_member, instance_id, user_id, joined_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    group.id.to_string(),
                    group.group_id,
                    group.name,
                    group.invite_code,
                    group.is_member,
                    group.instance_id.to_string(),
                    group.user_id.to_string(),
                    group.joined_at.as_ref().map(encode_ts),
                    encode_ts(&group.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_group(&self, id: Uuid) -> Result<Option<Group>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?1");
            conn.query_row(&sql, [id.to_string()], group_from_row).optional()
        })
    }

    /// Newest first; optionally narrowed to one instance.
    pub fn list_groups(&self, user_id: Uuid, instance_id: Option<Uuid>) -> Result<Vec<Group>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {GROUP_COLUMNS} FROM groups
                 WHERE user_id = ?1 AND (?2 IS NULL OR instance_id = ?2)
                 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user_id.to_string(), instance_id.map(|i| i.to_string())],
                    group_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_group(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM groups WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }

    pub fn count_groups(&self, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| count(conn, "SELECT COUNT(*) FROM groups WHERE user_id = ?1", &user_id))
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, text, target, is_group, instance_id, user_id, status, sent_at, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    message.id.to_string(),
                    message.text,
                    message.target,
                    message.is_group,
                    message.instance_id.to_string(),
                    message.user_id.to_string(),
                    message.status.as_str(),
                    message.sent_at.as_ref().map(encode_ts),
                    message.error,
                    encode_ts(&message.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_messages(
        &self,
        user_id: Uuid,
        instance_id: Option<Uuid>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Message>, u64)> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE user_id = ?1 AND (?2 IS NULL OR instance_id = ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3 OFFSET ?4"
            );
            let instance = instance_id.map(|i| i.to_string());
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user_id.to_string(), instance, limit, offset],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE user_id = ?1 AND (?2 IS NULL OR instance_id = ?2)",
                rusqlite::params![user_id.to_string(), instance],
                |row| row.get(0),
            )?;
            Ok((rows, total as u64))
        })
    }

    pub fn count_messages(&self, user_id: Uuid) -> Result<u64> {
        self.with_conn(|conn| {
            count(conn, "SELECT COUNT(*) FROM messages WHERE user_id = ?1", &user_id)
        })
    }

    pub fn count_messages_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE user_id = ?1 AND created_at >= ?2",
                rusqlite::params![user_id.to_string(), encode_ts(&since)],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }

    // -- System logs --

    pub fn insert_log(&self, log: &SystemLog) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO system_logs (id, kind, message, details, user_id, instance_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    log.id.to_string(),
                    log.kind.as_str(),
                    log.message,
                    log.details,
                    log.user_id.map(|u| u.to_string()),
                    log.instance_id.map(|i| i.to_string()),
                    encode_ts(&log.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_logs(
        &self,
        kind: Option<LogKind>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<SystemLog>, u64)> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {LOG_COLUMNS} FROM system_logs
                 WHERE (?1 IS NULL OR kind = ?1)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let kind = kind.map(|k| k.as_str());
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![kind, limit, offset], log_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM system_logs WHERE (?1 IS NULL OR kind = ?1)",
                [kind],
                |row| row.get(0),
            )?;
            Ok((rows, total as u64))
        })
    }

    // -- Feedback --

    pub fn insert_feedback(&self, feedback: &UserFeedback) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO user_feedback (id, user_id, message, kind, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    feedback.id.to_string(),
                    feedback.user_id.to_string(),
                    feedback.message,
                    feedback.kind.as_str(),
                    feedback.status.as_str(),
                    encode_ts(&feedback.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_feedback(&self, limit: u32, offset: u32) -> Result<(Vec<UserFeedback>, u64)> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {FEEDBACK_COLUMNS} FROM user_feedback
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?1 OFFSET ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![limit, offset], feedback_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM user_feedback", [], |row| row.get(0))?;
            Ok((rows, total as u64))
        })
    }

    pub fn update_feedback_status(
        &self,
        id: Uuid,
        status: FeedbackStatus,
    ) -> Result<Option<UserFeedback>> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE user_feedback SET status = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), status.as_str()],
            )?;
            let sql = format!("SELECT {FEEDBACK_COLUMNS} FROM user_feedback WHERE id = ?1");
            conn.query_row(&sql, [id.to_string()], feedback_from_row).optional()
        })
    }

    pub fn delete_feedback(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM user_feedback WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, is_admin, created_at FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                is_admin: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn count(conn: &Connection, sql: &str, user_id: &Uuid) -> Result<u64> {
    let n: i64 = conn.query_row(sql, [user_id.to_string()], |row| row.get(0))?;
    Ok(n as u64)
}

fn instance_from_row(row: &Row<'_>) -> rusqlite::Result<Instance> {
    Ok(Instance {
        id: decode_uuid(0, row.get(0)?)?,
        name: row.get(1)?,
        status: decode_enum(2, row.get(2)?)?,
        qr_code: row.get(3)?,
        phone_number: row.get(4)?,
        user_id: decode_uuid(5, row.get(5)?)?,
        created_at: decode_ts(6, row.get(6)?)?,
        updated_at: decode_ts(7, row.get(7)?)?,
        last_connected_at: decode_opt_ts(8, row.get(8)?)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: decode_uuid(0, row.get(0)?)?,
        group_id: row.get(1)?,
        name: row.get(2)?,
        invite_code: row.get(3)?,
        is_member: row.get(4)?,
        instance_id: decode_uuid(5, row.get(5)?)?,
        user_id: decode_uuid(6, row.get(6)?)?,
        joined_at: decode_opt_ts(7, row.get(7)?)?,
        created_at: decode_ts(8, row.get(8)?)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: decode_uuid(0, row.get(0)?)?,
        text: row.get(1)?,
        target: row.get(2)?,
        is_group: row.get(3)?,
        instance_id: decode_uuid(4, row.get(4)?)?,
        user_id: decode_uuid(5, row.get(5)?)?,
        status: decode_enum(6, row.get(6)?)?,
        sent_at: decode_opt_ts(7, row.get(7)?)?,
        error: row.get(8)?,
        created_at: decode_ts(9, row.get(9)?)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<SystemLog> {
    Ok(SystemLog {
        id: decode_uuid(0, row.get(0)?)?,
        kind: decode_enum(1, row.get(1)?)?,
        message: row.get(2)?,
        details: row.get(3)?,
        user_id: decode_opt_uuid(4, row.get(4)?)?,
        instance_id: decode_opt_uuid(5, row.get(5)?)?,
        created_at: decode_ts(6, row.get(6)?)?,
    })
}

fn feedback_from_row(row: &Row<'_>) -> rusqlite::Result<UserFeedback> {
    Ok(UserFeedback {
        id: decode_uuid(0, row.get(0)?)?,
        user_id: decode_uuid(1, row.get(1)?)?,
        message: row.get(2)?,
        kind: decode_enum(3, row.get(3)?)?,
        status: decode_enum(4, row.get(4)?)?,
        created_at: decode_ts(5, row.get(5)?)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wadmin_types::models::{FeedbackKind, MessageStatus};

    fn db_with_user() -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        db.create_user(&user_id.to_string(), "operator", "hash", false).unwrap();
        (db, user_id)
    }

    fn instance(user_id: Uuid, name: &str, status: InstanceStatus, age_secs: i64) -> Instance {
        let at = Utc::now() - Duration::seconds(age_secs);
        Instance {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status,
            qr_code: None,
            phone_number: None,
            user_id,
            created_at: at,
            updated_at: at,
            last_connected_at: None,
        }
    }

    #[test]
    fn only_the_first_account_bootstraps_as_admin() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_first_user(&Uuid::new_v4().to_string(), "root", "hash").unwrap());
        assert!(!db.create_first_user(&Uuid::new_v4().to_string(), "late", "hash").unwrap());

        let root = db.get_user_by_username("root").unwrap().unwrap();
        assert!(root.is_admin);
        assert!(db.get_user_by_username("late").unwrap().is_none());
    }

    #[test]
    fn duplicate_names_are_reported_as_unique_violations() {
        let (db, user) = db_with_user();
        let err = db
            .create_user(&Uuid::new_v4().to_string(), "operator", "hash", false)
            .unwrap_err();
        assert!(crate::is_unique_violation(&err));

        db.insert_instance(&instance(user, "main", InstanceStatus::QrNeeded, 1)).unwrap();
        let err = db
            .insert_instance(&instance(user, "main", InstanceStatus::QrNeeded, 1))
            .unwrap_err();
        assert!(crate::is_unique_violation(&err));

        let other = anyhow::anyhow!("disk full");
        assert!(!crate::is_unique_violation(&other));
    }

    #[test]
    fn instances_list_newest_first_with_total() {
        let (db, user) = db_with_user();
        db.insert_instance(&instance(user, "old", InstanceStatus::Connected, 30)).unwrap();
        db.insert_instance(&instance(user, "mid", InstanceStatus::QrNeeded, 20)).unwrap();
        db.insert_instance(&instance(user, "new", InstanceStatus::Disconnected, 10)).unwrap();

        let (page, total) = db.list_instances(user, 2, 0).unwrap();
        assert_eq!(total, 3);
        let names: Vec<_> = page.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["new", "mid"]);

        let (page, _) = db.list_instances(user, 2, 2).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "old");
    }

    #[test]
    fn instances_are_scoped_to_owner() {
        let (db, user) = db_with_user();
        let other = Uuid::new_v4();
        db.create_user(&other.to_string(), "someone", "hash", false).unwrap();
        db.insert_instance(&instance(other, "theirs", InstanceStatus::Connected, 1)).unwrap();

        let (page, total) = db.list_instances(user, 10, 0).unwrap();
        assert!(page.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn status_update_keeps_previous_connection_stamp() {
        let (db, user) = db_with_user();
        let inst = instance(user, "main", InstanceStatus::QrNeeded, 5);
        db.insert_instance(&inst).unwrap();

        let connected_at = Utc::now();
        let updated = db
            .update_instance_status(inst.id, InstanceStatus::Connected, connected_at, Some(connected_at))
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, InstanceStatus::Connected);
        assert!(updated.last_connected_at.is_some());

        let updated = db
            .update_instance_status(inst.id, InstanceStatus::Disconnected, Utc::now(), None)
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, InstanceStatus::Disconnected);
        assert_eq!(
            updated.last_connected_at.map(|t| encode_ts(&t)),
            Some(encode_ts(&connected_at))
        );
    }

    #[test]
    fn duplicate_instance_name_is_rejected() {
        let (db, user) = db_with_user();
        db.insert_instance(&instance(user, "dup", InstanceStatus::QrNeeded, 2)).unwrap();
        assert!(db.instance_name_exists("dup").unwrap());
        assert!(db.insert_instance(&instance(user, "dup", InstanceStatus::QrNeeded, 1)).is_err());
    }

    #[test]
    fn deleting_instance_leaves_groups_in_place() {
        let (db, user) = db_with_user();
        let inst = instance(user, "main", InstanceStatus::Connected, 5);
        db.insert_instance(&inst).unwrap();
        let group = Group {
            id: Uuid::new_v4(),
            group_id: "ABC".into(),
            name: "Grupo 1".into(),
            invite_code: "ABC".into(),
            is_member: true,
            instance_id: inst.id,
            user_id: user,
            joined_at: Some(Utc::now()),
            created_at: Utc::now(),
        };
        db.insert_group(&group).unwrap();

        assert!(db.delete_instance(inst.id).unwrap());
        assert!(db.get_instance(inst.id).unwrap().is_none());
        let groups = db.list_groups(user, Some(inst.id)).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, group.id);
        assert_eq!(db.get_group(group.id).unwrap().unwrap().name, "Grupo 1");
    }

    #[test]
    fn message_counts_respect_window() {
        let (db, user) = db_with_user();
        let instance_id = Uuid::new_v4();
        for (text, age) in [("fresh", 60), ("stale", 7200)] {
            let at = Utc::now() - Duration::seconds(age);
            db.insert_message(&Message {
                id: Uuid::new_v4(),
                text: text.into(),
                target: "+1".into(),
                is_group: false,
                instance_id,
                user_id: user,
                status: MessageStatus::Sent,
                sent_at: Some(at),
                error: None,
                created_at: at,
            })
            .unwrap();
        }

        assert_eq!(db.count_messages(user).unwrap(), 2);
        let hour_ago = Utc::now() - Duration::hours(1);
        assert_eq!(db.count_messages_since(user, hour_ago).unwrap(), 1);

        let (rows, total) = db.list_messages(user, Some(instance_id), 10, 0).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows[0].text, "fresh");
        let (rows, total) = db.list_messages(user, Some(Uuid::new_v4()), 10, 0).unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn logs_filter_by_kind() {
        let (db, _) = db_with_user();
        for kind in [LogKind::Error, LogKind::Info, LogKind::Error] {
            db.insert_log(&SystemLog {
                id: Uuid::new_v4(),
                kind,
                message: "m".into(),
                details: None,
                user_id: None,
                instance_id: None,
                created_at: Utc::now(),
            })
            .unwrap();
        }

        let (_, total) = db.list_logs(None, 50, 0).unwrap();
        assert_eq!(total, 3);
        let (errors, total) = db.list_logs(Some(LogKind::Error), 50, 0).unwrap();
        assert_eq!(total, 2);
        assert!(errors.iter().all(|l| l.kind == LogKind::Error));
    }

    #[test]
    fn feedback_status_update_and_delete() {
        let (db, user) = db_with_user();
        let fb = UserFeedback {
            id: Uuid::new_v4(),
            user_id: user,
            message: "QR expires too fast".into(),
            kind: FeedbackKind::Bug,
            status: FeedbackStatus::New,
            created_at: Utc::now(),
        };
        db.insert_feedback(&fb).unwrap();

        let updated = db
            .update_feedback_status(fb.id, FeedbackStatus::Resolved)
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, FeedbackStatus::Resolved);

        assert!(db.delete_feedback(fb.id).unwrap());
        assert!(!db.delete_feedback(fb.id).unwrap());
        assert!(db.update_feedback_status(fb.id, FeedbackStatus::New).unwrap().is_none());
    }
}
