pub mod session;

/// A generic insertable entity
pub trait Entity {
    fn get_key(&self) -> Vec<u8>;
    const COLLECTION: &'static str;
}
