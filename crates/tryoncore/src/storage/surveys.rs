use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::core::error::AppResult;
use crate::session::survey::CompletedSurvey;

/// Survey row as exposed on the reporting surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResponse {
    pub chat_id: i64,
    pub satisfaction: u8,
    pub realism: u8,
    pub frustration: String,
    pub value_for_money: u8,
    pub willingness_to_pay: String,
    pub reward: i64,
    pub created_at: String,
}

pub fn insert_survey_response(conn: &Connection, chat_id: i64, survey: &CompletedSurvey, reward: i64) -> AppResult<()> {
    conn.execute(
        "INSERT INTO survey_responses (chat_id, satisfaction, realism, frustration, value_for_money, willingness_to_pay, reward)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            chat_id,
            survey.satisfaction,
            survey.realism,
            survey.frustration.as_str(),
            survey.value_for_money,
            survey.willingness_to_pay,
            reward,
        ],
    )?;
    Ok(())
}

pub fn has_completed_survey(conn: &Connection, chat_id: i64) -> AppResult<bool> {
    let found = conn
        .query_row("SELECT 1 FROM survey_responses WHERE chat_id = ?1", [chat_id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub fn list_survey_responses(conn: &Connection) -> AppResult<Vec<SurveyResponse>> {
    let mut stmt = conn.prepare(
        "SELECT chat_id, satisfaction, realism, frustration, value_for_money, willingness_to_pay, reward, created_at
         FROM survey_responses ORDER BY created_at DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SurveyResponse {
                chat_id: row.get(0)?,
                satisfaction: row.get(1)?,
                realism: row.get(2)?,
                frustration: row.get(3)?,
                value_for_money: row.get(4)?,
                willingness_to_pay: row.get(5)?,
                reward: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
