/// Fixed-capacity arena with first-fit slot reuse.
///
/// Both the client table and the game table are allocated once at startup
/// and slots are handed back on disconnect/teardown; indices stay stable for
/// the lifetime of the occupant.
#[derive(Debug)]
pub struct FreeList<T> {
    len: usize,
    inner: Vec<Option<T>>,
}

impl<T> FreeList<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            len: 0,
            inner: std::iter::repeat_with(|| None).take(capacity).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn first_free(&self) -> Option<usize> {
        self.inner.iter().position(Option::is_none)
    }

    /// Places `value` in the first free slot, or gives it back if full.
    pub fn insert(&mut self, value: T) -> Result<usize, T> {
        let Some(index) = self.first_free() else {
            return Err(value);
        };
        self.inner[index] = Some(value);
        self.len += 1;
        Ok(index)
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        let value = self.inner.get_mut(index).and_then(Option::take);
        if value.is_some() {
            self.len -= 1;
        }
        value
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.inner.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.inner.get_mut(index).and_then(Option::as_mut)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.inner
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (i, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.inner
            .iter_mut()
            .enumerate()
            .filter_map(|(i, v)| v.as_mut().map(|v| (i, v)))
    }

    pub fn indices(&self) -> Vec<usize> {
        self.iter().map(|(i, _)| i).collect()
    }
}

impl<T> std::ops::Index<usize> for FreeList<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        self.get(index).expect("index should refer to an occupied slot")
    }
}

impl<T> std::ops::IndexMut<usize> for FreeList<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        self.get_mut(index)
            .expect("index should refer to an occupied slot")
    }
}
