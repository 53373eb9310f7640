//! Core types and data structures for the research job orchestrator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;
pub mod job;
pub mod message;
pub mod state;

pub use error::*;
pub use job::*;
pub use message::*;
pub use state::*;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(ConversationId);
uuid_id!(MessageId);
uuid_id!(UserId);
uuid_id!(DatasetId);
uuid_id!(JobId);
uuid_id!(IterationStateId);
uuid_id!(ConversationStateId);

/// Research mode, selects the iteration cap and the continue-decision policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResearchMode {
    SemiAutonomous,
    FullyAutonomous,
    Steering,
}

impl Default for ResearchMode {
    fn default() -> Self {
        ResearchMode::SemiAutonomous
    }
}

impl ResearchMode {
    /// Maximum chain depth for this mode, given the configured semi-autonomous cap.
    pub fn max_auto_iterations(self, semi_autonomous_cap: u32) -> u32 {
        match self {
            ResearchMode::Steering => 1,
            ResearchMode::FullyAutonomous => 20,
            ResearchMode::SemiAutonomous => semi_autonomous_cap,
        }
    }
}
