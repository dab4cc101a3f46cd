use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::crypto::Digest;
use super::payload::Payload;

/// Errors that can occur during Merkle tree operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Cannot build a Merkle tree from an empty payload list")]
    EmptyInput,

    #[error("Merkle tree has no elements")]
    EmptyTree,
}

/// One step of an inclusion proof, read from the leaf towards the root
///
/// `Left`/`Right` name the side the sibling sits on, so the verifier never has
/// to guess the concatenation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "digest", rename_all = "snake_case")]
pub enum ProofStep {
    /// `parent = H(sibling ‖ current)`
    Left(Digest),
    /// `parent = H(current ‖ sibling)`
    Right(Digest),
    /// Odd trailing node: `parent = H(current)`
    Lone,
    /// Terminates the proof with the expected root
    Root(Digest),
}

/// Inclusion proof for a payload; empty when the payload is not in the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn root(&self) -> Option<&Digest> {
        match self.steps.last() {
            Some(ProofStep::Root(root)) => Some(root),
            _ => None,
        }
    }
}

/// Binary hash tree over an ordered list of payloads
///
/// `levels[0]` holds the root and `levels[last]` the leaf hashes. A parent is
/// `H(left ‖ right)`, or `H(left)` when the level has an odd trailing node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleAccumulator {
    levels: Vec<Vec<Digest>>,
    elements: Vec<Payload>,
}

impl MerkleAccumulator {
    /// Builds a tree over `payloads` in one pass
    pub fn build(payloads: Vec<Payload>) -> Result<Self, MerkleError> {
        if payloads.is_empty() {
            return Err(MerkleError::EmptyInput);
        }

        let mut level: Vec<Digest> = payloads.iter().map(Payload::digest).collect();
        let mut levels = Vec::new();

        while level.len() > 1 {
            let parent = parent_level(&level);
            levels.push(level);
            level = parent;
        }
        levels.push(level);
        levels.reverse();

        Ok(MerkleAccumulator {
            levels,
            elements: payloads,
        })
    }

    /// Appends one payload, updating only the path from the new leaf to the root
    pub fn add(&mut self, payload: Payload) {
        let leaf = payload.digest();
        self.elements.push(payload);

        if self.levels.is_empty() {
            self.levels.push(vec![leaf]);
            return;
        }

        let leaf_level = self.levels.len() - 1;
        self.levels[leaf_level].push(leaf);

        let mut position = self.levels[leaf_level].len() - 1;
        for level in (1..=leaf_level).rev() {
            let parent_index = position / 2;
            let parent = parent_of(&self.levels[level], parent_index);

            let above = &mut self.levels[level - 1];
            if parent_index < above.len() {
                above[parent_index] = parent;
            } else {
                above.push(parent);
            }
            position = parent_index;
        }

        if self.levels[0].len() == 2 {
            let root = Digest::of_pair(&self.levels[0][0], &self.levels[0][1]);
            self.levels.insert(0, vec![root]);
        }
    }

    pub fn root(&self) -> Result<Digest, MerkleError> {
        self.levels
            .first()
            .and_then(|top| top.first())
            .copied()
            .ok_or(MerkleError::EmptyTree)
    }

    pub fn elements(&self) -> &[Payload] {
        &self.elements
    }

    pub fn levels(&self) -> &[Vec<Digest>] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, payload: &Payload) -> bool {
        self.elements.contains(payload)
    }

    /// Produces the inclusion proof of the first occurrence of `payload`
    pub fn proof(&self, payload: &Payload) -> MerkleProof {
        let Some(mut index) = self.elements.iter().position(|p| p == payload) else {
            return MerkleProof::default();
        };

        let mut steps = Vec::with_capacity(self.levels.len());
        for level in self.levels.iter().skip(1).rev() {
            let step = if index % 2 == 1 {
                ProofStep::Left(level[index - 1])
            } else if let Some(sibling) = level.get(index + 1) {
                ProofStep::Right(*sibling)
            } else {
                ProofStep::Lone
            };
            steps.push(step);
            index /= 2;
        }

        // levels[0] is never empty once an element exists
        steps.push(ProofStep::Root(self.levels[0][0]));

        MerkleProof { steps }
    }

    /// Recomputes the root from `payload` and `proof` and compares it with the
    /// root the proof ends with
    pub fn verify_proof(payload: &Payload, proof: &MerkleProof) -> bool {
        let Some((ProofStep::Root(root), path)) = proof.steps.split_last() else {
            return false;
        };

        let mut current = payload.digest();
        for step in path {
            current = match step {
                ProofStep::Left(sibling) => Digest::of_pair(sibling, &current),
                ProofStep::Right(sibling) => Digest::of_pair(&current, sibling),
                ProofStep::Lone => Digest::of(current.as_bytes()),
                ProofStep::Root(_) => return false,
            };
        }

        current == *root
    }

    /// Recomputes every level from the one below and checks it matches
    pub fn is_valid(&self) -> bool {
        if self.elements.is_empty() {
            return self.levels.is_empty();
        }

        let Some(leaves) = self.levels.last() else {
            return false;
        };
        if leaves.len() != self.elements.len()
            || leaves
                .iter()
                .zip(&self.elements)
                .any(|(leaf, payload)| *leaf != payload.digest())
        {
            return false;
        }

        for window in self.levels.windows(2) {
            if window[0] != parent_level(&window[1]) {
                return false;
            }
        }

        self.levels[0].len() == 1
    }
}

fn parent_of(level: &[Digest], parent_index: usize) -> Digest {
    let left = &level[parent_index * 2];
    match level.get(parent_index * 2 + 1) {
        Some(right) => Digest::of_pair(left, right),
        None => Digest::of(left.as_bytes()),
    }
}

fn parent_level(level: &[Digest]) -> Vec<Digest> {
    (0..level.len().div_ceil(2))
        .map(|index| parent_of(level, index))
        .collect()
}
