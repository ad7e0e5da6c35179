//! Source retrieval: git operations on the deployment host and commit
//! lookups against the hosting API

pub mod git;
pub mod hosting;

pub use git::{GitClient, RemoteGitClient};
pub use hosting::HostingApi;
