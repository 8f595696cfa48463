/**
Whether a pointer-like value points at nothing.
 */
pub trait IsNull {
    fn is_null(&self) -> bool;
}
