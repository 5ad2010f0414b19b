use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareVerdict {
    /// Hash met the consensus target and the node took the block.
    Accepted,
    /// Valid share work, but above the consensus target.
    AboveTarget,
    /// Met the target but the node refused it (stale tip, bad proof).
    NodeRejected,
}

/// The submit pipeline: rebuild the canonical header from the job's
/// template, hash it with the epoch-keyed engine, compare against the full
/// consensus target, and forward real solutions to the node.
///
/// The engine rekeys itself lazily from the epoch key the job advertised as
/// its seed hash, so a cold server can validate its first share without any
/// prior setup.
pub fn validate_and_submit(
    engine: &RandomxEngine,
    provider: &dyn BlockTemplateProvider,
    job: &Job,
    nonce: u32,
) -> Result<ShareVerdict> {
    let mut header = job.template.header.clone();
    header.nonce = nonce;

    engine.rekey_if_needed(&job.epoch_key)?;

    let hash = engine.hash(&header.serialize())?;
    let target = header.consensus_target();

    debug!(
        "share: job={} nonce={nonce:#010x} hash={}.. target={}..",
        job.job_id,
        hex::encode(&hash[..8]),
        hex::encode(&target[..8]),
    );

    if !meets_target(&hash, &target) {
        // Expected for the vast majority of shares; the pool target is far
        // easier than the consensus target.
        return Ok(ShareVerdict::AboveTarget);
    }

    info!(
        "BLOCK FOUND: height={} nonce={nonce} hash={}",
        job.height,
        hex::encode(hash)
    );

    if provider.submit_solution(&job.template, &header)? {
        Ok(ShareVerdict::Accepted)
    } else {
        warn!("node rejected block at height {}", job.height);
        Ok(ShareVerdict::NodeRejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AcceptAll;

    impl BlockTemplateProvider for AcceptAll {
        fn create_template(&self) -> Result<BlockTemplate> {
            bail!("not used")
        }

        fn submit_solution(&self, _: &BlockTemplate, header: &BlockHeader) -> Result<bool> {
            assert_ne!(header.nonce, 0, "solved header should carry the nonce");
            Ok(true)
        }

        fn tip_height(&self) -> Result<u64> {
            Ok(4)
        }

        fn epoch_key(&self) -> Result<[u8; 32]> {
            Ok([0x11; 32])
        }
    }

    fn job_with_bits(bits: u32) -> Job {
        let template = BlockTemplate {
            header: BlockHeader {
                prev_hash: [0x11; 32],
                bits,
                ..Default::default()
            },
            height: 5,
            coinbase: Vec::new(),
        };
        Job::new(
            Arc::new(template),
            5,
            [0x11; 32],
            "66aa012300000000".into(),
            ShareTarget::from_difficulty(1),
        )
    }

    #[test]
    fn verdicts_follow_the_consensus_target() {
        let engine = RandomxEngine::new();

        // 0x207fffff expands to a target covering half the hash range, so
        // some nearby nonce is a block
        let easy = job_with_bits(0x207f_ffff);
        let accepted = (1..=64).any(|nonce| {
            validate_and_submit(&engine, &AcceptAll, &easy, nonce).unwrap()
                == ShareVerdict::Accepted
        });
        assert!(accepted, "no nonce in 1..=64 met a half-range target");

        // engine lazily initialized itself from the job's prev hash
        assert!(engine.is_initialized());

        // 0x03000001 expands to a target of 1: nothing passes.
        let hard = job_with_bits(0x0300_0001);
        assert_eq!(
            validate_and_submit(&engine, &AcceptAll, &hard, 7).unwrap(),
            ShareVerdict::AboveTarget,
        );
    }
}
