//! Row mapping for `sessions` and `look_items`.

use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::core::error::AppResult;
use crate::session::survey::SurveyAnswers;
use crate::session::types::{ChatSession, CreditBalance, LookItem, Phase};
use crate::storage::db::now_timestamp;

const SESSION_COLUMNS: &str = "chat_id, phase, language, credits, model_image, original_model_image, model_gender, \
     last_monthly_grant, refinement, survey_answers, username, first_name";

fn read_balance(row: &Row<'_>, idx: usize) -> rusqlite::Result<CreditBalance> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(n) if n >= 0 => CreditBalance::Valid(n),
        ValueRef::Integer(n) => CreditBalance::Corrupt(n.to_string()),
        ValueRef::Real(f) => CreditBalance::Corrupt(f.to_string()),
        ValueRef::Text(t) => CreditBalance::Corrupt(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Null => CreditBalance::Corrupt("NULL".to_string()),
        ValueRef::Blob(_) => CreditBalance::Corrupt("<blob>".to_string()),
    })
}

fn map_session(row: &Row<'_>) -> rusqlite::Result<ChatSession> {
    let chat_id: i64 = row.get(0)?;
    let survey_json: Option<String> = row.get(9)?;
    let survey = match survey_json.as_deref() {
        Some(json) => serde_json::from_str::<SurveyAnswers>(json).unwrap_or_else(|e| {
            log::warn!("Discarding unreadable survey answers for chat {}: {}", chat_id, e);
            SurveyAnswers::default()
        }),
        None => SurveyAnswers::default(),
    };

    Ok(ChatSession {
        chat_id,
        phase: row.get(1)?,
        language: row.get(2)?,
        credits: read_balance(row, 3)?,
        model_image: row.get(4)?,
        original_model_image: row.get(5)?,
        model_gender: row.get(6)?,
        outfit_items: Vec::new(),
        last_monthly_grant: row.get(7)?,
        refinement: row.get(8)?,
        survey,
        username: row.get(10)?,
        first_name: row.get(11)?,
    })
}

fn load_items(conn: &Connection, chat_id: i64) -> AppResult<Vec<LookItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, category, description, image_ref, contains_person, gender_tag
         FROM look_items WHERE chat_id = ?1 ORDER BY position",
    )?;
    let items = stmt
        .query_map([chat_id], |row| {
            Ok(LookItem {
                id: row.get(0)?,
                category: row.get(1)?,
                description: row.get(2)?,
                image_ref: row.get(3)?,
                contains_person: row.get(4)?,
                gender: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Loads a session with its look items
pub fn load_session(conn: &Connection, chat_id: i64) -> AppResult<Option<ChatSession>> {
    let sql = format!("SELECT {} FROM sessions WHERE chat_id = ?1", SESSION_COLUMNS);
    let session = conn.query_row(&sql, [chat_id], map_session).optional()?;

    match session {
        Some(mut session) => {
            session.outfit_items = load_items(conn, chat_id)?;
            Ok(Some(session))
        }
        None => Ok(None),
    }
}

pub fn insert_session(conn: &Connection, session: &ChatSession) -> AppResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO sessions (chat_id, phase, credits, last_monthly_grant, username, first_name)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            session.chat_id,
            session.phase,
            session.credits.shown().unwrap_or(0),
            session.last_monthly_grant,
            session.username,
            session.first_name,
        ],
    )?;
    Ok(())
}

/// Writes every field of `session` and replaces its look items.
///
/// A corrupt balance is left untouched in the row.
pub fn save_session(conn: &Connection, session: &ChatSession) -> AppResult<()> {
    let survey_json = if session.survey.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&session.survey)?)
    };

    conn.execute(
        "UPDATE sessions SET phase = ?2, language = ?3, model_image = ?4, original_model_image = ?5,
             model_gender = ?6, last_monthly_grant = ?7, refinement = ?8, survey_answers = ?9,
             username = ?10, first_name = ?11, updated_at = ?12
         WHERE chat_id = ?1",
        params![
            session.chat_id,
            session.phase,
            session.language,
            session.model_image,
            session.original_model_image,
            session.model_gender,
            session.last_monthly_grant,
            session.refinement,
            survey_json,
            session.username,
            session.first_name,
            now_timestamp(),
        ],
    )?;

    if let CreditBalance::Valid(credits) = session.credits {
        conn.execute(
            "UPDATE sessions SET credits = ?2 WHERE chat_id = ?1",
            params![session.chat_id, credits],
        )?;
    }

    conn.execute("DELETE FROM look_items WHERE chat_id = ?1", [session.chat_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO look_items (id, chat_id, position, category, description, image_ref, contains_person, gender_tag)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for (position, item) in session.outfit_items.iter().enumerate() {
        stmt.execute(params![
            item.id,
            session.chat_id,
            position as i64,
            item.category,
            item.description,
            item.image_ref,
            item.contains_person,
            item.gender,
        ])?;
    }
    Ok(())
}

/// Marks the chat as active now
pub fn touch_last_active(conn: &Connection, chat_id: i64) -> AppResult<()> {
    conn.execute(
        "UPDATE sessions SET last_active_at = ?2 WHERE chat_id = ?1",
        params![chat_id, now_timestamp()],
    )?;
    Ok(())
}

pub fn chats_in_phase(conn: &Connection, phase: Phase) -> AppResult<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT chat_id FROM sessions WHERE phase = ?1")?;
    let ids = stmt
        .query_map([phase], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Appends an entry to the credit ledger
pub fn record_grant(conn: &Connection, chat_id: i64, reason: &str, amount: i64) -> AppResult<()> {
    conn.execute(
        "INSERT INTO credit_grants (chat_id, reason, amount) VALUES (?1, ?2, ?3)",
        params![chat_id, reason, amount],
    )?;
    Ok(())
}
