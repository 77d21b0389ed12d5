use hf_hub::{api::sync::Api, Repo, RepoType};
use std::path::{Path, PathBuf};

const WEIGHTS_FILE: &str = "model.safetensors";
const TOKENIZER_FILE: &str = "tokenizer.json";

#[derive(thiserror::Error, Debug)]
pub enum ResourceError {
    #[error("{file} not found for {repo_id} and downloading is disabled")]
    NotFound { repo_id: String, file: &'static str },

    #[error(transparent)]
    Hub(#[from] hf_hub::api::sync::ApiError),
}

#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
}

/// Where model weights come from.
///
/// A model `org/name` is looked up in `<resources_dir>/name` first, then in
/// `<resources_dir>/org/name`. When neither has the files and downloading is
/// allowed, they are fetched into the Hugging Face hub cache.
#[derive(Debug, Clone)]
pub struct ModelSource {
    resources_dir: Option<PathBuf>,
    allow_download: bool,
}

impl ModelSource {
    pub fn new(resources_dir: Option<PathBuf>, allow_download: bool) -> Self {
        Self {
            resources_dir,
            allow_download,
        }
    }

    pub fn resolve(&self, repo_id: &str) -> Result<ModelFiles, ResourceError> {
        if let Some(files) = self.local_files(repo_id) {
            tracing::debug!("using local model files for {}: {:?}", repo_id, files);
            return Ok(files);
        }

        if !self.allow_download {
            return Err(ResourceError::NotFound {
                repo_id: repo_id.to_string(),
                file: WEIGHTS_FILE,
            });
        }

        tracing::info!("fetching {} from the hub", repo_id);
        let api = Api::new()?;
        let repo = api.repo(Repo::with_revision(
            repo_id.to_string(),
            RepoType::Model,
            "main".to_string(),
        ));

        Ok(ModelFiles {
            weights: repo.get(WEIGHTS_FILE)?,
            tokenizer: repo.get(TOKENIZER_FILE)?,
        })
    }

    fn local_files(&self, repo_id: &str) -> Option<ModelFiles> {
        let resources_dir = self.resources_dir.as_ref()?;
        let name = repo_id.rsplit('/').next().unwrap_or(repo_id);

        [resources_dir.join(name), resources_dir.join(repo_id)]
            .into_iter()
            .find_map(|dir| files_in(&dir))
    }
}

fn files_in(dir: &Path) -> Option<ModelFiles> {
    let weights = dir.join(WEIGHTS_FILE);
    let tokenizer = dir.join(TOKENIZER_FILE);
    (weights.is_file() && tokenizer.is_file()).then_some(ModelFiles { weights, tokenizer })
}
