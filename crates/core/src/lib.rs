pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod risk;

pub use audit::{AuditLogError, HistoryFilter, InMemoryMessageLog, MessageLog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::message::{
    AgentId, EventType, Message, MessageId, MessageRecord, NewMessage, Payload, Recipient,
};
pub use domain::session::{Drink, DrinkId, DrinkInput, Session, SessionId, SessionStatus, UserId};
pub use domain::warning::{InterventionLevel, WarningLevel};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use risk::{RiskAssessmentEngine, SessionAnalysis};
