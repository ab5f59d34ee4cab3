use serde_derive::{Deserialize, Serialize};

#[derive(Deserialize, Serialize)]
pub struct UserForm {
    #[serde(default)]
    pub user: String,
}

/// Body of every json reply, `error` is empty on success.
#[derive(Deserialize, Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn none() -> Self {
        ErrorBody {
            error: String::new(),
        }
    }

    pub fn new(reason: &str) -> Self {
        ErrorBody {
            error: reason.to_string(),
        }
    }
}
