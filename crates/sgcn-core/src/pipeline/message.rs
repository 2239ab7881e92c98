use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AuxiliaryBatch, EnrichedRecord, SourceItem, SpeciesRecord};
use crate::ValidationError;

/// Stage-specific unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "unit", rename_all = "snake_case")]
pub enum StagePayload {
    /// Stage 1 trigger. `root_item` names the repository collection, if any.
    Start { root_item: Option<String> },
    SourceItem(SourceItem),
    SpeciesRecord(SpeciesRecord),
    AuxiliaryBatch(AuxiliaryBatch),
}

impl StagePayload {
    /// The only stage that accepts this payload.
    pub const fn stage(&self) -> u8 {
        match self {
            Self::Start { .. } => 1,
            Self::SourceItem(_) => 2,
            Self::SpeciesRecord(_) => 3,
            Self::AuxiliaryBatch(_) => 4,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::SourceItem(_) => "source_item",
            Self::SpeciesRecord(_) => "species_record",
            Self::AuxiliaryBatch(_) => "auxiliary_batch",
        }
    }
}

/// The JSON message every stage invocation receives.
///
/// Everything a stage needs travels here; stages share no call stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMessage {
    pub run_id: String,
    pub source_item_id: String,
    pub source_uri: String,
    pub stage: u8,
    pub payload: StagePayload,
}

impl StageMessage {
    /// Stage 1 message for a fresh run.
    pub fn start(root_item: Option<String>) -> Self {
        Self::start_with_run_id(new_run_id(), root_item)
    }

    pub fn start_with_run_id(run_id: impl Into<String>, root_item: Option<String>) -> Self {
        let root = root_item.clone().unwrap_or_default();
        Self {
            run_id: run_id.into(),
            source_item_id: root.clone(),
            source_uri: root,
            stage: 1,
            payload: StagePayload::Start { root_item },
        }
    }

    /// Message for the next stage in the same run and source item.
    pub fn follow_up(&self, payload: StagePayload) -> Self {
        let (source_item_id, source_uri) = match &payload {
            StagePayload::SourceItem(item) => {
                (item.source_item_id.clone(), item.source_file_url.clone())
            }
            StagePayload::Start { .. }
            | StagePayload::SpeciesRecord(_)
            | StagePayload::AuxiliaryBatch(_) => {
                (self.source_item_id.clone(), self.source_uri.clone())
            }
        };
        Self {
            run_id: self.run_id.clone(),
            source_item_id,
            source_uri,
            stage: payload.stage(),
            payload,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, crate::CoreError> {
        let message: Self = serde_json::from_str(json)?;
        message.validate()?;
        Ok(message)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Check the fields every stage relies on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.run_id.trim().is_empty() {
            return Err(ValidationError::MissingField { field: "run_id" });
        }
        if !(1..=4).contains(&self.stage) {
            return Err(ValidationError::UnknownStage { stage: self.stage });
        }
        if self.payload.stage() != self.stage {
            return Err(ValidationError::PayloadStageMismatch {
                stage: self.stage,
                payload: self.payload.kind(),
            });
        }
        if self.stage > 1 && self.source_item_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "source_item_id",
            });
        }
        Ok(())
    }

    /// Identifying name of the unit, for logs.
    pub fn unit_label(&self) -> String {
        match &self.payload {
            StagePayload::Start { .. } => format!("run {}", self.run_id),
            StagePayload::SourceItem(item) => {
                format!("{} {} ({})", item.state, item.year, item.source_item_id)
            }
            StagePayload::SpeciesRecord(species) => species.record.scientific_name.clone(),
            StagePayload::AuxiliaryBatch(batch) => {
                format!("{} batch of {}", batch.source, batch.lookups.len())
            }
        }
    }
}

/// What a stage asks the driver to deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Hand `message` to stage `message.stage`.
    Forward(StageMessage),
    /// Hand the finished record to the result sink.
    Final(EnrichedRecord),
}

pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}
