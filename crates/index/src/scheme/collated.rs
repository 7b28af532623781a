use granite_store::BlockIntList;

/// The read-only scheme: binary search over a persisted ordered list, as
/// loaded from a committed index set. All range and equality selects reduce
/// to the two search primitives over this list; there is no mutation
/// surface.
#[derive(Debug, Clone)]
pub struct Collated {
    list: BlockIntList,
}

impl Collated {
    pub fn from_list(list: BlockIntList) -> Collated {
        Collated { list }
    }

    pub fn list(&self) -> &BlockIntList {
        &self.list
    }
}
