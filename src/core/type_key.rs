use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifies which resource a container binding belongs to.
///
/// A binding is made either for one concrete type or for a whole generic
/// family (e.g. every `Counter<T>`), in which case the family tag is shared
/// by all instantiations.
#[derive(Debug, Clone, Copy)]
pub enum ResourceTypeKey {
    Concrete {
        id: TypeId,
        name: &'static str,
        family: Option<&'static str>,
    },
    Family(&'static str),
}

impl ResourceTypeKey {
    pub fn of<T: 'static>() -> Self {
        Self::Concrete {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            family: None,
        }
    }

    pub fn of_family_member<T: 'static>(family: &'static str) -> Self {
        Self::Concrete {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            family: Some(family),
        }
    }

    pub fn family(tag: &'static str) -> Self {
        Self::Family(tag)
    }

    /// Family key this key falls back to during resolution, if any.
    pub fn family_key(&self) -> Option<ResourceTypeKey> {
        match self {
            Self::Concrete {
                family: Some(tag), ..
            } => Some(Self::Family(tag)),
            _ => None,
        }
    }

    pub fn is_family(&self) -> bool {
        matches!(self, Self::Family(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Concrete { name, .. } => name,
            Self::Family(tag) => tag,
        }
    }
}

// Concrete keys compare by `TypeId` only; the name and family tag are
// derived from the type and carry no identity of their own.
impl PartialEq for ResourceTypeKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Concrete { id: a, .. }, Self::Concrete { id: b, .. }) => a == b,
            (Self::Family(a), Self::Family(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ResourceTypeKey {}

impl Hash for ResourceTypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Concrete { id, .. } => {
                0u8.hash(state);
                id.hash(state);
            }
            Self::Family(tag) => {
                1u8.hash(state);
                tag.hash(state);
            }
        }
    }
}

impl fmt::Display for ResourceTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete { name, .. } => write!(f, "{name}"),
            Self::Family(tag) => write!(f, "{tag}<_>"),
        }
    }
}
