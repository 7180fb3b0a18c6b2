//! Chain of received frames handed to the network stack in one call

use arrayvec::ArrayVec;

/// Accepted frames from one pass over the RX ring, oldest first.
///
/// One pass visits at most `N` descriptors, so the chain never needs more
/// than `N` links.
pub struct FrameChain<B, const N: usize> {
    frames: ArrayVec<B, N>,
}

impl<B, const N: usize> FrameChain<B, N> {
    /// Empty chain
    pub fn new() -> Self {
        FrameChain {
            frames: ArrayVec::new(),
        }
    }

    /// Append a frame at the tail.
    ///
    /// Hands the buffer back if the chain is full.
    pub fn push(&mut self, buffer: B) -> Result<(), B> {
        self.frames.try_push(buffer).map_err(|e| e.element())
    }

    /// Number of frames in the chain
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True if nothing was accepted
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// First frame of the chain
    pub fn head(&self) -> Option<&B> {
        self.frames.first()
    }

    /// Walk the chain in arrival order
    pub fn iter(&self) -> core::slice::Iter<'_, B> {
        self.frames.iter()
    }
}

impl<B, const N: usize> Default for FrameChain<B, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B, const N: usize> IntoIterator for FrameChain<B, N> {
    type Item = B;
    type IntoIter = arrayvec::IntoIter<B, N>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_arrival_order() {
        let mut chain: FrameChain<u8, 3> = FrameChain::new();
        assert!(chain.is_empty());
        chain.push(7).unwrap();
        chain.push(8).unwrap();
        chain.push(9).unwrap();
        assert_eq!(chain.head(), Some(&7));
        assert_eq!(chain.into_iter().collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test]
    fn full_chain_returns_the_buffer() {
        let mut chain: FrameChain<u8, 1> = FrameChain::new();
        chain.push(1).unwrap();
        assert_eq!(chain.push(2), Err(2));
        assert_eq!(chain.len(), 1);
    }
}
