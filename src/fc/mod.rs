pub mod detector;
pub mod parser;
pub mod prompt;

pub use detector::{
    find_first_open_tag, find_trailing_block, has_complete_trailing_block, has_incomplete_block,
    TagBlock, TagKind,
};
pub use parser::{
    coerce_param_value, parse_invocations, parse_next_invocation, parse_wrapped_block,
    NextInvocation, ToolCall, WrappedBlock, STRING_ONLY_PARAMS,
};
pub use prompt::generate_tool_instructions;
