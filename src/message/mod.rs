//! Protocol messages, validation and handling

pub mod dto;
pub mod handler;
pub mod validator;

pub use dto::{RequestEnvelope, RequestMessage, ResponseEnvelope, ResponseMessage};
pub use handler::MessageHandler;
pub use validator::{MessageValidator, ValidationPipeline};
