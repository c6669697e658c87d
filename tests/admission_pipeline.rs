//! End-to-end admission: honest events stream through the pipeline into the
//! store, misbehaving ones are rejected with the right peer treatment, and the
//! oracle backend sees what was admitted.

use anyhow::Result;
use dag_admission::ban::{classify, is_ban, BanDecision, CheckError};
use dag_admission::checkers::Checkers;
use dag_admission::epochcheck::EpochError;
use dag_admission::gaspower::GasPowerError;
use dag_admission::gpo_backend::GasPowerOracleBackend;
use dag_admission::heavycheck::{HeavyCheckConfig, HeavyCheckError};
use dag_admission::rules::Rules;
use dag_admission::state::{NextEpoch, Store};
use dag_admission::types::{Event, GasTrack, Validators};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

mod util;
use util::test_net::{pubkeys, TestNet, EPOCH_START_SECS};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

async fn admit(checkers: &Checkers, net: &TestNet, e: Arc<Event>) -> Result<Result<(), CheckError>> {
    let parents = net
        .store
        .parents_of(&e)
        .expect("parents are admitted before their children");
    let (tx, rx) = oneshot::channel();
    if let Err(err) = checkers.admit(e.clone(), &parents, move |res| {
        let _ = tx.send(res);
    }) {
        return Ok(Err(err));
    }
    let verdict = timeout(TEST_TIMEOUT, rx).await??;
    if verdict.is_ok() {
        net.store.apply_event(e);
    }
    Ok(verdict)
}

#[tokio::test]
async fn test_honest_events_stream_through_admission() -> Result<()> {
    let net = TestNet::new(&[(1, 1), (2, 1)], Rules::mainnet());
    let checkers = Checkers::from_reader(net.store.clone(), HeavyCheckConfig::default());
    checkers.heavy.start();

    let mut secs = EPOCH_START_SECS + 1;
    for _round in 0..5 {
        for (creator, other) in [(1, 2), (2, 1)] {
            let others: Vec<_> = net
                .store
                .last_events()
                .get(other)
                .and_then(|id| net.store.get_event(&id))
                .into_iter()
                .collect();
            let e = Arc::new(net.emit(creator, secs, &others));
            assert_eq!(admit(&checkers, &net, e).await?, Ok(()));
            secs += 1;
        }
    }
    assert_eq!(checkers.heavy.stats().verified, 10);
    assert_eq!(checkers.heavy.stats().rejected, 0);

    let backend = GasPowerOracleBackend::new(net.store.clone());
    let mut expected = 0;
    net.store.last_events().for_each(|_, id| {
        let e = net.store.get_event(id).unwrap();
        expected += e.gas_power_left.get(GasTrack::LongTerm);
    });
    assert!(expected > 0);
    assert_eq!(backend.total_gas_power_left(), expected);
    Ok(())
}

#[tokio::test]
async fn test_forgeries_are_banned_and_not_applied() -> Result<()> {
    let net = TestNet::new(&[(1, 1), (2, 1)], Rules::mainnet());
    let checkers = Checkers::from_reader(net.store.clone(), HeavyCheckConfig::default());
    checkers.heavy.start();

    // Bad signature: the cheap stages pass, the queued verification fails.
    let mut forged = net.emit(1, EPOCH_START_SECS + 1, &[]);
    forged.signature[5] ^= 0x01;
    let verdict = admit(&checkers, &net, Arc::new(forged)).await?;
    assert_eq!(
        verdict,
        Err(CheckError::Heavy(HeavyCheckError::WrongEventSig))
    );
    assert!(is_ban(&verdict));
    assert!(net.store.last_events().is_empty());

    // Validly signed, but claiming more gas power than the allowance gives.
    let honest = net.emit(1, EPOCH_START_SECS + 1, &[]);
    let mut greedy = honest.clone();
    greedy.gas_power_left.gas[GasTrack::ShortTerm.index()] += 1;
    let greedy = Arc::new(Event {
        signature: dag_admission::types::sign_bytes(&net.keys[&1], &greedy.signing_bytes()),
        ..greedy
    });
    let verified_before = checkers.heavy.stats().verified;
    let verdict = admit(&checkers, &net, greedy).await?;
    assert!(matches!(
        verdict,
        Err(CheckError::GasPower(GasPowerError::InsufficientGasPower {
            track: GasTrack::ShortTerm,
            ..
        }))
    ));
    assert!(is_ban(&verdict));
    assert_eq!(checkers.heavy.stats().verified, verified_before);

    assert_eq!(admit(&checkers, &net, Arc::new(honest)).await?, Ok(()));
    Ok(())
}

#[tokio::test]
async fn test_new_epoch_carries_over_and_ignores_stale_events() -> Result<()> {
    let net = TestNet::new(&[(1, 1), (2, 1)], Rules::mainnet());
    let checkers = Checkers::from_reader(net.store.clone(), HeavyCheckConfig::default());
    checkers.heavy.start();

    let first = Arc::new(net.emit(1, EPOCH_START_SECS + 1, &[]));
    assert_eq!(admit(&checkers, &net, first.clone()).await?, Ok(()));
    let late = Arc::new(net.emit(1, EPOCH_START_SECS + 2, &[]));

    let next = net.store.advance_epoch(NextEpoch {
        start: dag_admission::types::Timestamp::from_secs(EPOCH_START_SECS + 50),
        validators: Arc::new(Validators::new(vec![(1, 1), (2, 1)])),
        rules: None,
        pubkeys: pubkeys(2, &net.keys),
    });
    assert_eq!(next.epoch, 2);
    let carried = next.validator_state(1).unwrap().prev_epoch_event.clone().unwrap();
    assert_eq!(carried.id, first.id());
    assert_eq!(carried.gas_power_left, first.gas_power_left);

    // An event of the sealed epoch is dropped without punishing the relayer.
    let verdict = admit(&checkers, &net, late).await?;
    let err = verdict.clone().unwrap_err();
    assert_eq!(
        err,
        CheckError::Epoch(EpochError::NotRelevant {
            event: 1,
            current: 2
        })
    );
    assert_eq!(classify(&err), BanDecision::Ignore);
    assert!(!is_ban(&verdict));

    let opening = Arc::new(net.emit(1, EPOCH_START_SECS + 51, &[]));
    assert_eq!(opening.epoch, 2);
    assert_eq!(opening.seq, 1);
    assert_eq!(admit(&checkers, &net, opening).await?, Ok(()));
    Ok(())
}

#[tokio::test]
async fn test_stopped_checker_asks_to_retry() -> Result<()> {
    let net = TestNet::new(&[(1, 1)], Rules::mainnet());
    let checkers = Checkers::from_reader(net.store.clone(), HeavyCheckConfig::default());
    checkers.heavy.start();
    checkers.heavy.stop();

    let e = Arc::new(net.emit(1, EPOCH_START_SECS + 1, &[]));
    let verdict = admit(&checkers, &net, e).await?;
    let err = verdict.unwrap_err();
    assert_eq!(err, CheckError::Heavy(HeavyCheckError::Terminated));
    assert_eq!(classify(&err), BanDecision::RetryLater);
    Ok(())
}
