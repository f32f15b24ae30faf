mod store;

pub use store::{
    sanitize_file_name, SessionStore, EVENTS_FILE, RESULT_IMAGE_PREFIX, SESSION_RECORD_FILE,
};
