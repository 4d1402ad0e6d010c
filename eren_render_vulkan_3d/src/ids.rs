//! Plain value handles into the resource caches.
//!
//! An id is an index into the cache that returned it. Ids are handed out in
//! increasing order starting at 0 and never reused; `NULL` (`u32::MAX`) means
//! "no resource". Holding an id past the owning cache's `cleanup` is a logic
//! error: the index stays valid as a number but names nothing.

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            bytemuck::Pod, bytemuck::Zeroable,
        )]
        pub struct $name(pub u32);

        impl $name {
            pub const NULL: Self = Self(u32::MAX);

            pub fn is_null(self) -> bool {
                self == Self::NULL
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NULL
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.is_null() {
                    write!(f, "{}(null)", stringify!($name))
                } else {
                    write!(f, "{}({})", stringify!($name), self.0)
                }
            }
        }
    };
}

define_id!(MeshId);
define_id!(
    /// Also the slot in the bindless texture array.
    TextureId
);
define_id!(MaterialId);
define_id!(PipelineId);

/// Converts a collection length into the id of the next element.
pub(crate) fn next_id(len: usize) -> u32 {
    let id = u32::try_from(len).unwrap_or(u32::MAX);
    assert!(id != u32::MAX, "resource id space exhausted");
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_distinct_from_zero() {
        assert!(TextureId::NULL.is_null());
        assert!(!TextureId(0).is_null());
        assert_eq!(TextureId::default(), TextureId::NULL);
        assert_eq!(MeshId(3).to_string(), "MeshId(3)");
        assert_eq!(MaterialId::NULL.to_string(), "MaterialId(null)");
    }

    #[test]
    fn ids_are_plain_u32_on_the_gpu() {
        assert_eq!(bytemuck::bytes_of(&TextureId(7)), &7u32.to_le_bytes());
    }
}
