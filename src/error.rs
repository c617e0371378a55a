#[derive(Debug)]
pub enum AppError {
    Validation(String),
    Conflict(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl AppError {
    pub fn validation<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::Validation(t.to_string())
    }

    pub fn conflict<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::Conflict(t.to_string())
    }

    pub fn not_found<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::NotFound(t.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "validation error: {msg}"),
            AppError::Conflict(msg) => write!(f, "conflict: {msg}"),
            AppError::NotFound(msg) => write!(f, "not found: {msg}"),
            AppError::Internal(err) => write!(f, "internal error: {err}"),
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError::Internal(err.into())
    }
}
