mod model;

pub use model::{Message, NewMessage, ROLE_ASSISTANT, ROLE_USER};
