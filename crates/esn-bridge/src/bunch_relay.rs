//! Bunch Relay (ESN -> ETH): aggregated headers co-signed by the committee.
//!
//! A submission is accepted only if it continues the bunch chain, every
//! signature recovers to a validator, the recovered signers are strictly
//! descending by address, and there are at least `ceil(2N/3)` of them. A
//! single bad signature rejects the whole submission.

use esn_core::{
    recover_signer, Address, Bunch, BunchHeader, ErrorKind, Signature65, SignatureError,
    SigningDomain, ValidatorSet, MAX_BUNCH_DEPTH,
};
use esn_storage::{BunchStore, BunchStoreError};
use thiserror::Error;
use tracing::{info, warn};

use crate::events::BunchSubmitted;
use crate::locator::search_bunches;

#[derive(Debug, Error)]
pub enum BunchRelayError {
    #[error("invalid start block no.")]
    InvalidStartBlock { expected: u64, got: u64 },

    #[error("bunch depth {depth} exceeds maximum {max}")]
    DepthTooLarge { depth: u8, max: u8 },

    #[error("signature {position}: {source}")]
    InvalidSignature {
        position: usize,
        #[source]
        source: SignatureError,
    },

    #[error("signature {position}: signer 0x{signer} is not a validator")]
    UnknownSigner { position: usize, signer: String },

    #[error("signature {position}: signers not strictly descending")]
    SignersNotDescending { position: usize },

    #[error("not 66% validators")]
    NotEnoughSignatures { have: usize, need: usize },

    #[error("storage: {0}")]
    Storage(String),
}

impl BunchRelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidStartBlock { .. } => ErrorKind::Sequence,
            Self::DepthTooLarge { .. } => ErrorKind::Malformed,
            Self::InvalidSignature { .. } | Self::SignersNotDescending { .. } => {
                ErrorKind::Signature
            }
            Self::UnknownSigner { .. } => ErrorKind::Authorization,
            Self::NotEnoughSignatures { .. } => ErrorKind::Quorum,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<BunchStoreError> for BunchRelayError {
    fn from(e: BunchStoreError) -> Self {
        match e {
            BunchStoreError::StartMismatch { expected, got } => {
                Self::InvalidStartBlock { expected, got }
            }
            BunchStoreError::InvalidDepth(depth) => Self::DepthTooLarge {
                depth,
                max: MAX_BUNCH_DEPTH,
            },
            other @ (BunchStoreError::Sled(_) | BunchStoreError::Corrupt(_)) => {
                Self::Storage(other.to_string())
            }
        }
    }
}

/// ESN header relay bound to one validator set and signing domain.
#[derive(Clone)]
pub struct BunchRelay {
    validators: ValidatorSet,
    domain: SigningDomain,
    store: BunchStore,
}

impl BunchRelay {
    pub fn new(validators: ValidatorSet, domain: SigningDomain, store: BunchStore) -> Self {
        Self {
            validators,
            domain,
            store,
        }
    }

    pub fn domain(&self) -> &SigningDomain {
        &self.domain
    }

    /// Signatures needed to post.
    pub fn quorum(&self) -> usize {
        self.validators.quorum()
    }

    /// Recover and check the signer set of `header`.
    pub fn verify_signatures(
        &self,
        header: &BunchHeader,
        signatures: &[Signature65],
    ) -> Result<Vec<Address>, BunchRelayError> {
        let digest = header.signing_digest(&self.domain);

        let mut signers = Vec::with_capacity(signatures.len());
        for (position, signature) in signatures.iter().enumerate() {
            let signer = recover_signer(&digest, signature)
                .map_err(|source| BunchRelayError::InvalidSignature { position, source })?;
            if !self.validators.contains(&signer) {
                return Err(BunchRelayError::UnknownSigner {
                    position,
                    signer: hex::encode(signer),
                });
            }
            signers.push(signer);
        }

        if let Some(position) = signers.windows(2).position(|pair| pair[0] <= pair[1]) {
            return Err(BunchRelayError::SignersNotDescending {
                position: position + 1,
            });
        }

        let need = self.quorum();
        if signers.len() < need {
            return Err(BunchRelayError::NotEnoughSignatures {
                have: signers.len(),
                need,
            });
        }
        Ok(signers)
    }

    /// Validate and append a co-signed bunch header.
    pub fn submit_bunch_header(
        &self,
        header: &BunchHeader,
        signatures: &[Signature65],
    ) -> Result<BunchSubmitted, BunchRelayError> {
        let result = self.submit_inner(header, signatures);
        if let Err(e) = &result {
            warn!(
                start_block_number = header.start_block_number,
                bunch_depth = header.bunch_depth,
                signatures = signatures.len(),
                error = %e,
                "bunch submission rejected"
            );
        }
        result
    }

    fn submit_inner(
        &self,
        header: &BunchHeader,
        signatures: &[Signature65],
    ) -> Result<BunchSubmitted, BunchRelayError> {
        let expected = self.store.next_start_block_number()?;
        if header.start_block_number != expected {
            return Err(BunchRelayError::InvalidStartBlock {
                expected,
                got: header.start_block_number,
            });
        }
        if header.bunch_depth > MAX_BUNCH_DEPTH {
            return Err(BunchRelayError::DepthTooLarge {
                depth: header.bunch_depth,
                max: MAX_BUNCH_DEPTH,
            });
        }

        let signers = self.verify_signatures(header, signatures)?;

        let bunch = header.to_bunch();
        let bunch_index = self.store.append(&bunch)?;
        let next_start_block_number = self.store.next_start_block_number()?;

        info!(
            bunch_index,
            start_block_number = bunch.start_block_number,
            bunch_depth = bunch.bunch_depth,
            signers = signers.len(),
            transactions_mega_root = %hex::encode(bunch.transactions_mega_root),
            "bunch submitted"
        );
        Ok(BunchSubmitted {
            bunch_index,
            bunch,
            last_block_hash: header.last_block_hash,
            signers,
            next_start_block_number,
        })
    }

    pub fn get_next_start_block_number(&self) -> Result<u64, BunchRelayError> {
        Ok(self.store.next_start_block_number()?)
    }

    /// Bunch at `index` (1-based).
    pub fn bunch(&self, index: u64) -> Result<Option<Bunch>, BunchRelayError> {
        Ok(self.store.get(index)?)
    }

    /// Index of the latest bunch; zero before the first submission.
    pub fn last_bunch_index(&self) -> Result<u64, BunchRelayError> {
        Ok(self.store.count()?)
    }

    /// Index of the bunch covering `block_number`, found by binary search
    /// over the stored bunches.
    pub fn find_bunch_index(&self, block_number: u64) -> Result<Option<u64>, BunchRelayError> {
        let count = self.store.count()?;
        search_bunches(count, block_number, |index| {
            self.store.get(index)?.ok_or_else(|| {
                BunchRelayError::from(BunchStoreError::Corrupt(format!("bunch {index} missing")))
            })
        })
    }
}
