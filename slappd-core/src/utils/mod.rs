pub mod backoff;
pub mod html;
