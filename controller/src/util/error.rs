#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Yaml error: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("Parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },
}
