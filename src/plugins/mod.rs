pub mod headers;
pub mod robots_hint;
