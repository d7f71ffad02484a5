//! PDA derivation for verifier program accounts

use solana_sdk::pubkey::Pubkey;

use crate::{instruction::Network, STATUS_SEED};

/// PDA derivation utilities
pub struct PdaDeriver;

impl PdaDeriver {
    /// Derive a submitter's status account
    pub fn derive_status(submitter: &Pubkey, program_id: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[submitter.as_ref(), STATUS_SEED], program_id)
    }

    /// Derive a target program's verification record for one network
    pub fn derive_verification(
        target: &Pubkey,
        network: Network,
        program_id: &Pubkey,
    ) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[target.as_ref(), network.seed().as_bytes()],
            program_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_address_is_deterministic() {
        let program_id = Pubkey::new_unique();
        let submitter = Pubkey::new_unique();

        let (a, bump_a) = PdaDeriver::derive_status(&submitter, &program_id);
        let (b, bump_b) = PdaDeriver::derive_status(&submitter, &program_id);
        assert_eq!(a, b);
        assert_eq!(bump_a, bump_b);

        let (other, _) = PdaDeriver::derive_status(&Pubkey::new_unique(), &program_id);
        assert_ne!(a, other);
    }

    #[test]
    fn test_verification_address_depends_on_network() {
        let program_id = Pubkey::new_unique();
        let target = Pubkey::new_unique();

        let (dev, _) = PdaDeriver::derive_verification(&target, Network::DevNet, &program_id);
        let (main, _) = PdaDeriver::derive_verification(&target, Network::MainNet, &program_id);
        assert_ne!(dev, main);
    }
}
