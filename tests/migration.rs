use quicsand::core::migration::{
    bind_to_interface, encode_path_challenge, enumerate_interfaces, find_path_response,
    new_challenge_data,
};
use quicsand::core::{
    ClientConfig, QuicConnection, PATH_CHALLENGE_FRAME, PATH_RESPONSE_FRAME,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn path_challenge_frame_layout() {
    let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let frame = encode_path_challenge(&data);
    assert_eq!(frame.len(), 9);
    assert_eq!(frame[0], PATH_CHALLENGE_FRAME);
    assert_eq!(&frame[1..], &data);
}

#[test]
fn path_response_is_matched_anywhere_in_the_payload() {
    let mut rng = StdRng::seed_from_u64(1);
    let data = new_challenge_data(&mut rng);

    let mut payload = vec![0x00, 0x07, 0x3b];
    payload.push(PATH_RESPONSE_FRAME);
    payload.extend_from_slice(&data);
    payload.push(0x00);
    assert!(find_path_response(&payload, &data));
}

#[test]
fn path_response_requires_matching_echo() {
    let data = [9u8; 8];
    let other = [8u8; 8];

    let mut payload = vec![PATH_RESPONSE_FRAME];
    payload.extend_from_slice(&other);
    assert!(!find_path_response(&payload, &data));

    // A PATH_CHALLENGE with the same bytes is not a response.
    let mut challenge = vec![PATH_CHALLENGE_FRAME];
    challenge.extend_from_slice(&data);
    assert!(!find_path_response(&challenge, &data));

    assert!(!find_path_response(&[], &data));
}

#[test]
fn loopback_is_filtered_from_interface_enumeration() {
    for name in enumerate_interfaces() {
        assert_ne!(name.to_ascii_lowercase(), "lo");
    }
}

#[test]
fn binding_to_a_missing_interface_fails() {
    let err = bind_to_interface("quicsand-missing0").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}

#[tokio::test]
async fn failed_migration_rolls_back_and_reports_once() {
    let mut conn = QuicConnection::new(ClientConfig::default(), None).expect("socket bind");
    let original_addr = conn.local_addr();

    if conn.enable_migration(true).is_err() {
        // No usable interfaces in this environment; the rollback path
        // is still covered by the bind failure test above.
        return;
    }
    let mut events = conn.subscribe_migration();
    conn.set_preferred_interface("quicsand-missing0");

    assert!(conn.initiate_migration().is_err());

    let event = events.try_recv().expect("one event per attempt");
    assert!(!event.success);
    assert_eq!(event.new_interface.as_deref(), Some("quicsand-missing0"));
    assert!(
        events.try_recv().is_err(),
        "exactly one event per migration attempt"
    );

    // The original socket is untouched and still bound.
    assert_eq!(conn.local_addr(), original_addr);
}
