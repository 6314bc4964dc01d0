#![no_main]

use certscore_lib::{PeerCertificate, StorePolicy, TrustStore, TrustStoreEvaluator, TrustStoreId};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Treat the input as a leaf followed by a garbage intermediate so both
    // the summary parser and the path builder see hostile DER.
    let split = data.len() / 2;
    let (leaf, rest) = data.split_at(split);
    let Ok(peer) = PeerCertificate::from_der_chain("fuzz.test", vec![leaf.to_vec(), rest.to_vec()])
    else {
        return;
    };
    let evaluator = TrustStoreEvaluator::from_stores(vec![(
        TrustStoreId::Mozilla,
        TrustStore::new(),
        StorePolicy::default(),
    )]);
    for evaluation in evaluator.evaluate(&peer).values() {
        assert_eq!(evaluation.score.is_none(), evaluation.verdict == certscore_lib::TrustVerdict::Unknown);
    }
});
