//! Fixed-width key codec for index pages.

/// A key type storable in B+ tree pages.
///
/// Keys are fixed-width and encoded little-endian into page buffers; the
/// `Ord` bound supplies the comparator the tree routes and sorts with.
pub trait IndexKey:
    Copy + Ord + Default + std::fmt::Debug + Send + Sync + 'static
{
    /// Width of the on-page encoding in bytes.
    const ENCODED_LEN: usize;

    /// Serializes the key into `buf` (exactly `ENCODED_LEN` bytes).
    fn encode_into(&self, buf: &mut [u8]);

    /// Deserializes a key from `buf`.
    fn decode_from(buf: &[u8]) -> Self;
}

macro_rules! impl_index_key {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl IndexKey for $ty {
                const ENCODED_LEN: usize = $len;

                fn encode_into(&self, buf: &mut [u8]) {
                    buf[..$len].copy_from_slice(&self.to_le_bytes());
                }

                fn decode_from(buf: &[u8]) -> Self {
                    <$ty>::from_le_bytes(buf[..$len].try_into().unwrap())
                }
            }
        )*
    };
}

impl_index_key!(u32 => 4, i32 => 4, u64 => 8, i64 => 8);
