use l402::{
    parse_authorization, www_authenticate, AuthError, Challenge, MacaroonIssuer,
    MacaroonVerifier, PaymentHash, Preimage, RootKey, SqliteTokenStore, TokenStore,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PATH: &str = "/fetch-url-content";
const TTL: Duration = Duration::from_secs(3600);
const NOW: u64 = 1_750_000_000;

fn challenge_for(preimage: &Preimage, issuer: &MacaroonIssuer) -> (Challenge, String) {
    let hash = preimage.payment_hash();
    let token = issuer.issue_at(hash, PATH, NOW, TTL);
    let challenge = Challenge {
        payment_hash: hash,
        price_msat: 10_000,
        resource_path: PATH.to_string(),
        issued_at: NOW,
        expires_at: token.expires_at,
        invoice: "lnbc100n1test".to_string(),
        invoice_expires_at: NOW + 600,
        verify_url: None,
    };
    (challenge, token.encode())
}

#[test]
fn preimage_retry_against_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("challenges.db");
    let store = Arc::new(SqliteTokenStore::open(path.to_str().unwrap()).unwrap());
    let key = Arc::new(RootKey::generate());
    let issuer = MacaroonIssuer::new(key.clone());
    let verifier = MacaroonVerifier::new(key, store.clone(), true);

    let preimage = Preimage([0x5a; 32]);
    let (challenge, token) = challenge_for(&preimage, &issuer);
    store.put(&challenge).unwrap();

    // Header the client would see, then the header it sends back.
    let header = www_authenticate(&token, &challenge.invoice);
    assert!(header.starts_with("L402 token=\""));

    let bare = parse_authorization(&format!("L402 {token}")).unwrap();
    assert_eq!(
        verifier.verify_with_proof(&bare.token, bare.preimage().as_ref(), PATH, NOW + 1),
        Err(AuthError::PaymentNotSettled)
    );

    let wrong = parse_authorization(&format!("L402 {token}:{}", "00".repeat(32))).unwrap();
    assert_eq!(
        verifier.verify_with_proof(&wrong.token, wrong.preimage().as_ref(), PATH, NOW + 1),
        Err(AuthError::PaymentNotSettled)
    );

    let paid = parse_authorization(&format!("L402 {token}:{}", hex::encode(preimage.0))).unwrap();
    assert_eq!(
        verifier.verify_with_proof(&paid.token, paid.preimage().as_ref(), PATH, NOW + 1),
        Ok(challenge.payment_hash)
    );

    // Settlement is durable; the bare token now works.
    assert_eq!(verifier.verify(&token, PATH, NOW + 2), Ok(challenge.payment_hash));
    assert!(store.is_settled(&challenge.payment_hash).unwrap());
}

#[test]
fn preimage_for_unknown_challenge_does_not_settle() {
    let store = Arc::new(l402::InMemoryTokenStore::new());
    let key = Arc::new(RootKey::generate());
    let issuer = MacaroonIssuer::new(key.clone());
    let verifier = MacaroonVerifier::new(key, store, true);

    let preimage = Preimage([0x11; 32]);
    let (_, token) = challenge_for(&preimage, &issuer);
    assert_eq!(
        verifier.verify_with_proof(&token, Some(&preimage), PATH, NOW + 1),
        Err(AuthError::PaymentNotSettled)
    );
}

#[test]
fn single_use_token_admits_exactly_once_under_contention() {
    let store = Arc::new(l402::InMemoryTokenStore::new());
    let key = Arc::new(RootKey::generate());
    let issuer = MacaroonIssuer::new(key.clone());
    let verifier = Arc::new(MacaroonVerifier::new(key, store.clone(), false));

    let preimage = Preimage([0x22; 32]);
    let (challenge, token) = challenge_for(&preimage, &issuer);
    store.put(&challenge).unwrap();
    store.mark_settled(&challenge.payment_hash).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let verifier = verifier.clone();
            let token = token.clone();
            thread::spawn(move || verifier.verify(&token, PATH, NOW + 1))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 1);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| *r == Err(AuthError::AlreadyRedeemed)));
}

#[test]
fn tokens_from_another_root_key_are_rejected() {
    let store = Arc::new(l402::InMemoryTokenStore::new());
    let issuer = MacaroonIssuer::new(Arc::new(RootKey::generate()));
    let verifier = MacaroonVerifier::new(Arc::new(RootKey::generate()), store.clone(), true);

    let hash = PaymentHash([0x33; 32]);
    let token = issuer.issue_at(hash, PATH, NOW, TTL).encode();
    assert_eq!(
        verifier.verify(&token, PATH, NOW + 1),
        Err(AuthError::InvalidSignature)
    );
}
