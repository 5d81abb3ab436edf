pub mod claude;
pub mod error;
pub mod openai;
pub mod perplexity;
pub mod schema;
pub mod traits;
pub mod util;

pub use claude::Claude;
pub use error::AiError;
pub use openai::OpenAi;
pub use perplexity::Perplexity;
pub use schema::StructuredOutput;
pub use traits::{extract, ChatModel, Completion, Grounded};
pub use util::{strip_code_blocks, truncate_to_char_boundary};
