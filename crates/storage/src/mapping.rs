//! Field-level encoding of a `SessionFragment`.
//!
//! A fragment is stored as independent string values keyed by
//! `{exam_id, field}`. Every backend goes through this module so the decoding
//! rules are identical whichever store is in use.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use exam_core::model::{QuestionId, SessionFragment};

use crate::repository::StorageError;

/// One independently stored value of a session fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FragmentField {
    CurrentQuestion,
    Answers,
    Flagged,
    TimeRemaining,
    Timestamp,
}

impl FragmentField {
    pub const ALL: [FragmentField; 5] = [
        FragmentField::CurrentQuestion,
        FragmentField::Answers,
        FragmentField::Flagged,
        FragmentField::TimeRemaining,
        FragmentField::Timestamp,
    ];

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            FragmentField::CurrentQuestion => "current_question",
            FragmentField::Answers => "answers",
            FragmentField::Flagged => "flagged",
            FragmentField::TimeRemaining => "time_remaining",
            FragmentField::Timestamp => "timestamp",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }
}

fn corrupt(field: FragmentField, reason: impl Into<String>) -> StorageError {
    StorageError::Corrupt {
        field: field.key(),
        reason: reason.into(),
    }
}

/// Encode every field of a fragment.
///
/// # Errors
///
/// Returns `StorageError::Serialization` if a collection cannot be encoded.
pub fn encode_fragment(
    fragment: &SessionFragment,
) -> Result<Vec<(FragmentField, String)>, StorageError> {
    let answers: BTreeMap<String, u32> = fragment
        .answers
        .iter()
        .map(|(id, option)| (id.value().to_string(), *option))
        .collect();
    let flagged: Vec<u64> = fragment.flagged.iter().map(QuestionId::value).collect();

    let answers = serde_json::to_string(&answers)
        .map_err(|err| StorageError::Serialization(err.to_string()))?;
    let flagged = serde_json::to_string(&flagged)
        .map_err(|err| StorageError::Serialization(err.to_string()))?;

    Ok(vec![
        (
            FragmentField::CurrentQuestion,
            fragment.current_index.to_string(),
        ),
        (FragmentField::Answers, answers),
        (FragmentField::Flagged, flagged),
        (
            FragmentField::TimeRemaining,
            fragment.remaining_seconds.to_string(),
        ),
        (
            FragmentField::Timestamp,
            fragment.last_tick_at.timestamp_millis().to_string(),
        ),
    ])
}

/// Decode stored fields into a fragment.
///
/// No fields at all means no session. Missing position, answers or flags
/// fall back to their empty values; missing timing fields, or any value that
/// fails to parse, make the whole fragment corrupt.
///
/// # Errors
///
/// Returns `StorageError::Corrupt` naming the offending field.
pub fn decode_fragment(
    fields: &HashMap<FragmentField, String>,
) -> Result<Option<SessionFragment>, StorageError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let current_index = match fields.get(&FragmentField::CurrentQuestion) {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|err| corrupt(FragmentField::CurrentQuestion, err.to_string()))?,
        None => 0,
    };

    let answers = match fields.get(&FragmentField::Answers) {
        Some(raw) => decode_answers(raw)?,
        None => BTreeMap::new(),
    };

    let flagged = match fields.get(&FragmentField::Flagged) {
        Some(raw) => serde_json::from_str::<Vec<u64>>(raw)
            .map_err(|err| corrupt(FragmentField::Flagged, err.to_string()))?
            .into_iter()
            .map(QuestionId::new)
            .collect::<BTreeSet<_>>(),
        None => BTreeSet::new(),
    };

    let remaining_seconds = fields
        .get(&FragmentField::TimeRemaining)
        .ok_or_else(|| corrupt(FragmentField::TimeRemaining, "missing"))?
        .trim()
        .parse::<u32>()
        .map_err(|err| corrupt(FragmentField::TimeRemaining, err.to_string()))?;

    let millis = fields
        .get(&FragmentField::Timestamp)
        .ok_or_else(|| corrupt(FragmentField::Timestamp, "missing"))?
        .trim()
        .parse::<i64>()
        .map_err(|err| corrupt(FragmentField::Timestamp, err.to_string()))?;
    let last_tick_at = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| corrupt(FragmentField::Timestamp, format!("{millis} out of range")))?;

    Ok(Some(SessionFragment {
        current_index,
        answers,
        flagged,
        remaining_seconds,
        last_tick_at,
    }))
}

fn decode_answers(raw: &str) -> Result<BTreeMap<QuestionId, u32>, StorageError> {
    let parsed: BTreeMap<String, u32> = serde_json::from_str(raw)
        .map_err(|err| corrupt(FragmentField::Answers, err.to_string()))?;
    parsed
        .into_iter()
        .map(|(key, option)| {
            key.parse::<QuestionId>()
                .map(|id| (id, option))
                .map_err(|err| corrupt(FragmentField::Answers, err.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::time::fixed_now;

    fn sample() -> SessionFragment {
        SessionFragment {
            current_index: 2,
            answers: BTreeMap::from([(QuestionId::new(1), 1), (QuestionId::new(3), 0)]),
            flagged: BTreeSet::from([QuestionId::new(3)]),
            remaining_seconds: 45,
            last_tick_at: fixed_now(),
        }
    }

    fn fields_of(fragment: &SessionFragment) -> HashMap<FragmentField, String> {
        encode_fragment(fragment).unwrap().into_iter().collect()
    }

    #[test]
    fn encodes_answers_as_object_keyed_by_question() {
        let fields = fields_of(&sample());
        assert_eq!(fields[&FragmentField::Answers], r#"{"1":1,"3":0}"#);
        assert_eq!(fields[&FragmentField::Flagged], "[3]");
        assert_eq!(fields[&FragmentField::Timestamp], "1700000000000");
    }

    #[test]
    fn decodes_what_it_encodes() {
        let fragment = sample();
        let decoded = decode_fragment(&fields_of(&fragment)).unwrap();
        assert_eq!(decoded, Some(fragment));
    }

    #[test]
    fn empty_field_set_is_no_session() {
        assert_eq!(decode_fragment(&HashMap::new()).unwrap(), None);
    }

    #[test]
    fn optional_fields_default_when_missing() {
        let mut fields = fields_of(&sample());
        fields.remove(&FragmentField::Answers);
        fields.remove(&FragmentField::Flagged);
        fields.remove(&FragmentField::CurrentQuestion);

        let decoded = decode_fragment(&fields).unwrap().unwrap();
        assert_eq!(decoded.current_index, 0);
        assert!(decoded.answers.is_empty());
        assert!(decoded.flagged.is_empty());
        assert_eq!(decoded.remaining_seconds, 45);
    }

    #[test]
    fn missing_timer_is_corrupt() {
        let mut fields = fields_of(&sample());
        fields.remove(&FragmentField::TimeRemaining);
        let err = decode_fragment(&fields).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { field: "time_remaining", .. }));
    }

    #[test]
    fn unparsable_answers_are_corrupt() {
        let mut fields = fields_of(&sample());
        fields.insert(FragmentField::Answers, "{not json".into());
        let err = decode_fragment(&fields).unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { field: "answers", .. }));
    }

    #[test]
    fn field_keys_round_trip() {
        for field in FragmentField::ALL {
            assert_eq!(FragmentField::from_key(field.key()), Some(field));
        }
        assert_eq!(FragmentField::from_key("bogus"), None);
    }
}
