use std::collections::HashMap;

use serde::Serialize;
use typed_builder::TypedBuilder;

#[derive(Clone, Debug, Serialize, TypedBuilder)]
pub struct LoginBody {
    #[builder(setter(into))]
    pub username: String,
    #[builder(setter(into))]
    pub password: String,
}

/// Body of `POST items/ultraDownload`. `required_passwords` maps the id of
/// the folder a lock originates from to the password supplied for it.
#[derive(Clone, Debug, Serialize, TypedBuilder)]
pub struct UltraDownloadBody {
    pub ids: Vec<String>,
    #[builder(default)]
    pub required_passwords: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, TypedBuilder)]
pub struct CreateFolderBody {
    #[builder(setter(into))]
    pub name: String,
    #[builder(setter(into))]
    pub parent_id: String,
}
