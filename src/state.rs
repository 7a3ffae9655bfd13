/// Value that can be carried through the protocol and stored in the
/// decided log. Blanket-implemented for any type meeting the bounds.
#[rustfmt::skip]
pub trait Value: Send
    + Sync
    + Clone
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + 'static
{
}

#[rustfmt::skip]
impl<T> Value for T where T: Send
    + Sync
    + Clone
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + 'static
{
}
