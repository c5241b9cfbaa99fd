/// Semantic checks run after a configuration has been deserialized
///
/// Deserialization only proves the shape is right; implementations reject
/// values that parse but make no sense (zero batch sizes, inverted ranges).
pub trait Validate {
    /// # Errors
    ///
    /// Returns a human-readable description of the first invalid value.
    fn validate(&self) -> Result<(), String>;
}
