use quicsand::fec::{AdaptiveFec, FecCodec, XorFec, MAX_REDUNDANCY, MIN_REDUNDANCY};

#[test]
fn data_packets_deliver_immediately() {
    let mut tx = XorFec::new(3);
    let mut rx = XorFec::new(3);
    let packets = tx.encode(b"hello");
    assert_eq!(packets.len(), 1, "no repair until the window fills");
    let delivered = rx.add_received_packet(&packets[0]);
    assert_eq!(delivered, vec![b"hello".to_vec()]);
}

#[test]
fn window_completion_emits_a_repair_packet() {
    let mut tx = XorFec::new(3);
    assert_eq!(tx.encode(b"one").len(), 1);
    assert_eq!(tx.encode(b"two").len(), 1);
    let last = tx.encode(b"three");
    assert_eq!(last.len(), 2, "third packet closes the window with a repair");
}

#[test]
fn single_loss_in_a_window_is_recovered() {
    let mut tx = XorFec::new(3);
    let mut rx = XorFec::new(3);

    let p1 = tx.encode(b"alpha");
    let p2 = tx.encode(b"bravo-longer");
    let p3 = tx.encode(b"charlie");
    let (data3, repair) = (&p3[0], &p3[1]);

    let mut delivered = Vec::new();
    delivered.extend(rx.add_received_packet(&p1[0]));
    // p2 is lost on the wire.
    delivered.extend(rx.add_received_packet(data3));
    delivered.extend(rx.add_received_packet(repair));

    assert!(
        delivered.contains(&b"bravo-longer".to_vec()),
        "missing payload must be rebuilt from the parity"
    );
    assert!(delivered.contains(&b"alpha".to_vec()));
    assert!(delivered.contains(&b"charlie".to_vec()));
}

#[test]
fn no_recovery_with_two_losses() {
    let mut tx = XorFec::new(3);
    let mut rx = XorFec::new(3);
    tx.encode(b"one");
    let p2 = tx.encode(b"two");
    let p3 = tx.encode(b"three");

    let mut delivered = Vec::new();
    delivered.extend(rx.add_received_packet(&p2[0]));
    delivered.extend(rx.add_received_packet(&p3[1])); // repair only
    assert_eq!(delivered, vec![b"two".to_vec()], "XOR cannot fill two holes");
}

#[test]
fn duplicate_packets_deliver_once() {
    let mut tx = XorFec::new(4);
    let mut rx = XorFec::new(4);
    let p = tx.encode(b"dup");
    assert_eq!(rx.add_received_packet(&p[0]).len(), 1);
    assert_eq!(rx.add_received_packet(&p[0]).len(), 0);
}

#[test]
fn garbage_packets_are_ignored() {
    let mut rx = XorFec::new(3);
    assert!(rx.add_received_packet(&[]).is_empty());
    assert!(rx.add_received_packet(&[0xff; 4]).is_empty());
    assert!(rx.add_received_packet(&[9, 0, 0, 0, 1, 0, 3, 1, 2]).is_empty());
}

#[test]
fn redundancy_rate_is_clamped() {
    let mut fec = AdaptiveFec::with_default_codec();
    fec.set_redundancy_rate(0.9);
    assert_eq!(fec.redundancy_rate(), MAX_REDUNDANCY);
    fec.set_redundancy_rate(0.01);
    assert_eq!(fec.redundancy_rate(), MIN_REDUNDANCY);
}

#[test]
fn redundancy_follows_observed_loss() {
    let mut fec = AdaptiveFec::with_default_codec();
    fec.update_redundancy_rate(0.2);
    assert!((fec.redundancy_rate() - 0.3).abs() < 1e-9, "1.5 * 0.2 = 0.3");
    fec.update_redundancy_rate(0.01);
    assert_eq!(fec.redundancy_rate(), MIN_REDUNDANCY);
    fec.update_redundancy_rate(0.9);
    assert_eq!(fec.redundancy_rate(), MAX_REDUNDANCY);
}

#[test]
fn rate_recomputes_after_fifty_packets() {
    let mut fec = AdaptiveFec::with_default_codec();
    fec.report_loss(20, 100);
    assert_eq!(fec.observed_loss(), 0.2);
    let before = fec.redundancy_rate();
    for _ in 0..49 {
        fec.on_send(b"payload");
    }
    assert_eq!(fec.redundancy_rate(), before, "no update before 50 packets");
    fec.on_send(b"payload");
    assert!((fec.redundancy_rate() - 0.3).abs() < 1e-9);
}

#[test]
fn adaptive_path_survives_loss_end_to_end() {
    let mut tx = AdaptiveFec::new(Box::new(XorFec::new(2)), 0.5);
    let mut rx = AdaptiveFec::new(Box::new(XorFec::new(2)), 0.5);

    let first = tx.on_send(b"first");
    let second = tx.on_send(b"second");
    assert_eq!(second.len(), 2, "rate 0.5 closes the window every 2 packets");

    let mut delivered = Vec::new();
    delivered.extend(rx.on_receive(&first[0]));
    // second[0] lost; repair arrives.
    delivered.extend(rx.on_receive(&second[1]));
    assert!(delivered.contains(&b"second".to_vec()));
}
