use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::dao::models::{DeckEntity, QuestionEntity};

const MIN_CHOICES: usize = 2;
const MAX_CHOICES: usize = 6;

/// Payload used to seed a deck with its questions.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeckRequest {
    #[validate(length(min = 1, max = 80))]
    pub name: String,
    #[validate(length(min = 1, max = 500), nested)]
    pub questions: Vec<QuestionInput>,
}

/// One multiple-choice question of a deck.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInput {
    pub prompt: String,
    pub choices: Vec<String>,
    pub correct_index: usize,
}

impl Validate for QuestionInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.prompt.trim().is_empty() {
            let mut err = ValidationError::new("prompt_empty");
            err.message = Some("Question prompt must not be empty".into());
            errors.add("prompt", err);
        }

        if !(MIN_CHOICES..=MAX_CHOICES).contains(&self.choices.len()) {
            let mut err = ValidationError::new("choices_count");
            err.message = Some(
                format!(
                    "A question needs {MIN_CHOICES} to {MAX_CHOICES} choices (got {})",
                    self.choices.len()
                )
                .into(),
            );
            errors.add("choices", err);
        } else if self.correct_index >= self.choices.len() {
            let mut err = ValidationError::new("correct_index_range");
            err.message = Some("Correct index must point at one of the choices".into());
            errors.add("correct_index", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl CreateDeckRequest {
    /// Assign ids and split the request into persisted rows.
    pub fn into_entities(self) -> (DeckEntity, Vec<QuestionEntity>) {
        let questions: Vec<QuestionEntity> = self
            .questions
            .into_iter()
            .map(|question| QuestionEntity {
                id: Uuid::new_v4(),
                prompt: question.prompt.trim().to_owned(),
                choices: question.choices,
                correct_index: question.correct_index,
            })
            .collect();

        let deck = DeckEntity {
            id: Uuid::new_v4(),
            name: self.name.trim().to_owned(),
            question_ids: questions.iter().map(|question| question.id).collect(),
        };

        (deck, questions)
    }
}

/// Deck listing entry.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeckSummary {
    pub id: Uuid,
    pub name: String,
    pub question_count: usize,
}

impl From<DeckEntity> for DeckSummary {
    fn from(deck: DeckEntity) -> Self {
        Self {
            id: deck.id,
            name: deck.name,
            question_count: deck.question_ids.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(choices: usize, correct_index: usize) -> QuestionInput {
        QuestionInput {
            prompt: "Capital of France?".into(),
            choices: (0..choices).map(|i| format!("choice {i}")).collect(),
            correct_index,
        }
    }

    #[test]
    fn question_needs_between_two_and_six_choices() {
        assert!(question(1, 0).validate().is_err());
        assert!(question(2, 1).validate().is_ok());
        assert!(question(6, 5).validate().is_ok());
        assert!(question(7, 0).validate().is_err());
    }

    #[test]
    fn correct_index_must_be_in_range() {
        assert!(question(4, 4).validate().is_err());
    }

    #[test]
    fn deck_validation_reaches_each_question() {
        let valid = CreateDeckRequest {
            name: "Geography".into(),
            questions: vec![question(3, 0), question(2, 1)],
        };
        assert!(valid.validate().is_ok());

        let invalid = CreateDeckRequest {
            name: "Geography".into(),
            questions: vec![question(3, 0), question(1, 0)],
        };
        let errors = invalid.validate().unwrap_err();
        assert!(errors.errors().contains_key("questions"));
    }

    #[test]
    fn into_entities_links_question_ids() {
        let request = CreateDeckRequest {
            name: " Geography ".into(),
            questions: vec![question(3, 0), question(3, 2)],
        };
        let (deck, questions) = request.into_entities();
        assert_eq!(deck.name, "Geography");
        assert_eq!(
            deck.question_ids,
            questions.iter().map(|q| q.id).collect::<Vec<_>>()
        );
    }
}
