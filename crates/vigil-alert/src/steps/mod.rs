//! The four pipeline steps, composed in fixed order by
//! [`crate::pipeline::Pipeline`].

mod expression;
mod inhibit;
mod notify;
mod rule;

pub use expression::ExpressionEvaluationStep;
pub use inhibit::InhibitionStep;
pub use notify::NotificationStep;
pub use rule::RuleEvaluationStep;
