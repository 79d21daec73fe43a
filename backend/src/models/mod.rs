pub mod channel;
pub mod event;
pub mod item;
pub mod rule;
pub mod stakeholder;

pub use channel::{Channel, ConnectorKind, KindGroup, Source, ValidationOutcome};
pub use event::{EventKind, ItemEvent};
pub use item::{DuplicateSibling, Item, ItemDetail, Priority, RetryPriority};
pub use rule::{CreateRuleRequest, Rule, RuleKind, UpdateRuleRequest};
pub use stakeholder::Stakeholder;
