#[derive(Debug, Clone, PartialEq)]
pub struct BasaltError(pub String);
impl BasaltError {
    pub fn new(msg: impl Into<String>) -> Self { Self(msg.into()) }
}
impl std::fmt::Display for BasaltError { fn fmt(&self, f:&mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) } }
impl std::error::Error for BasaltError {}


pub type Result<T> = std::result::Result<T, BasaltError>;
