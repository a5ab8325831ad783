mod common;

use smartfeeder::{
    config::Settings,
    feeder::{FeedOptions, Feeder, FeederState, Issue},
    location::Location,
    packet::{Command, DecodeError, Payload, Response},
    registry::FeederId,
    slots::SlotStore,
    Controller, Error, FeedFailure,
    };
use common::*;


const A: &str = "00112233445566778899AABB";
const B: &str = "FFEEDDCCBBAA998877665544";
/// success from address 1 carrying no data, with its checksum damaged
const CORRUPT: &str = "00020100A075";

/// feeder already found and initialized at the given address, with an empty history
async fn ready(controller: &Controller<ScriptedBus>, bus: &ScriptedBus, address: u8) -> FeederId {
    let id = configured_feeder(controller, hardware_id(A), address);
    reachable(bus, hardware_id(A), address);
    controller.prepare_for_job(id).await.unwrap();
    bus.clear_history();
    id
}

#[test]
fn prepare_finds_then_initializes() {
    test(async {
        let (controller, bus) = controller();
        let id = configured_feeder(&controller, hardware_id(A), 3);
        reachable(&bus, hardware_id(A), 3);
        assert_eq!(controller.registry().get(id).unwrap().state(), FeederState::AddressUnknown);

        controller.prepare_for_job(id).await.unwrap();

        let feeder = controller.registry().get(id).unwrap();
        assert_eq!(feeder.slot_address(), Some(3));
        assert!(feeder.is_initialized());
        assert_eq!(feeder.state(), FeederState::Ready);
        let find = bus.position(&Command::get_feeder_address(hardware_id(A))).unwrap();
        let initialize = bus.position(&Command::initialize_feeder(3, hardware_id(A))).unwrap();
        assert!(find < initialize);
        assert_eq!(bus.sent().len(), 2);

        // nothing to do on a ready feeder
        bus.clear_history();
        controller.prepare_for_job(id).await.unwrap();
        assert!(bus.sent().is_empty());
    });
}

#[test]
fn prepare_relocates_other_feeder() {
    test(async {
        let (controller, bus) = controller();
        let id = configured_feeder(&controller, hardware_id(A), 2);
        controller.registry().assign_address(id, 1).unwrap();
        // another feeder was plugged in the slot we believed ours
        bus.reply(&Command::initialize_feeder(1, hardware_id(A)),
            Response::WrongFeederUuid {address: 1, hardware_id: hardware_id(B)});
        reachable(&bus, hardware_id(A), 2);

        controller.prepare_for_job(id).await.unwrap();

        let feeder = controller.registry().get(id).unwrap();
        assert_eq!(feeder.slot_address(), Some(2));
        assert!(feeder.is_initialized());

        let other = controller.registry().find_by_hardware_id(&hardware_id(B)).unwrap();
        let other = controller.registry().get(other).unwrap();
        assert_eq!(other.slot_address(), Some(1));
        assert!(!other.is_initialized());
        assert_eq!(controller.registry().find_by_slot_address(1).map(|found| controller.registry().get(found).unwrap().hardware_id()),
            Some(Some(hardware_id(B))));
    });
}

#[test]
fn prepare_gives_up_after_retries() {
    test(async {
        let bus = ScriptedBus::new();
        let settings = Settings {feeder_communication_max_retry: 2, .. settings()};
        let controller = Controller::new(bus.clone(), settings);
        let id = configured_feeder(&controller, hardware_id(A), 1);
        bus.reply(&Command::get_feeder_address(hardware_id(A)), identity(1, hardware_id(A)));
        bus.timeout(&Command::initialize_feeder(1, hardware_id(A)));

        let result = controller.prepare_for_job(id).await;
        assert!(matches!(result, Err(Error::ConnectionFailed(ref name)) if name == A));
        assert_eq!(bus.count(&Command::initialize_feeder(1, hardware_id(A))), 3);
        assert_eq!(bus.count(&Command::get_feeder_address(hardware_id(A))), 3);
        assert_eq!(bus.sent().len(), 6);
        assert_eq!(controller.registry().get(id).unwrap().slot_address(), None);
    });
}

#[test]
fn prepare_retries_corrupt_initialization() {
    test(async {
        let (controller, bus) = controller();
        let id = configured_feeder(&controller, hardware_id(A), 1);
        bus.reply(&Command::get_feeder_address(hardware_id(A)), identity(1, hardware_id(A)));
        bus.reply_raw_once(&Command::initialize_feeder(1, hardware_id(A)), CORRUPT);
        bus.reply(&Command::initialize_feeder(1, hardware_id(A)), done(1));

        controller.prepare_for_job(id).await.unwrap();
        // the garbled answer forgets the address, like a timeout
        assert_eq!(bus.count(&Command::get_feeder_address(hardware_id(A))), 2);
        assert_eq!(bus.count(&Command::initialize_feeder(1, hardware_id(A))), 2);
        assert_eq!(controller.registry().get(id).unwrap().state(), FeederState::Ready);

        let other = configured_feeder(&controller, hardware_id(B), 2);
        bus.reply(&Command::get_feeder_address(hardware_id(B)), identity(2, hardware_id(B)));
        bus.reply_raw(&Command::initialize_feeder(2, hardware_id(B)), CORRUPT);
        bus.clear_history();

        let result = controller.prepare_for_job(other).await;
        assert!(matches!(result, Err(Error::ConnectionFailed(ref name)) if name == B));
        assert_eq!(bus.count(&Command::initialize_feeder(2, hardware_id(B))), 4);
        assert_eq!(bus.sent().len(), 8);
        assert_eq!(controller.registry().get(other).unwrap().slot_address(), None);
    });
}

#[test]
fn prepare_missing_feeder() {
    test(async {
        let (controller, bus) = controller();
        let id = configured_feeder(&controller, hardware_id(A), 1);
        bus.timeout(&Command::get_feeder_address(hardware_id(A)));

        assert!(matches!(controller.prepare_for_job(id).await, Err(Error::ConnectionFailed(_))));
        // without an address there is nothing to initialize
        assert_eq!(bus.sent().len(), 4);
    });
}

#[test]
fn prepare_checks_location() {
    test(async {
        let (controller, bus) = controller();
        let id = configured_feeder(&controller, hardware_id(A), 1);
        reachable(&bus, hardware_id(A), 4);
        assert!(matches!(controller.prepare_for_job(id).await, Err(Error::UnconfiguredSlot(4))));

        let unconfigured = controller.registry().register(Feeder::new()).unwrap();
        assert!(matches!(controller.prepare_for_job(unconfigured).await, Err(Error::Unconfigured)));
    });
}

#[test]
fn pick_location_composes_offset() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        assert_eq!(controller.pick_location(id).unwrap(), Location::new(2., 3., 3., 45.));

        let slots = &**controller.slots();
        assert!(controller.registry().get(id).unwrap().issues(slots).is_empty());
        // no part loaded yet
        assert!(!controller.registry().get(id).unwrap().is_usable(slots));
        controller.registry().update(id, |feeder| feeder.set_part(Some(String::from("R0603-10k")))).unwrap();
        assert!(controller.registry().get(id).unwrap().is_usable(slots));

        controller.slots().set_location(1, None);
        assert_eq!(controller.registry().get(id).unwrap().issues(slots), vec![Issue::UnconfiguredSlot(1)]);
    });
}

#[test]
fn feed_moves_and_polls() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        bus.reply(&Command::move_feed_forward(1, 40), feeding(1));
        bus.reply(&Command::move_feed_status(1), done(1));

        controller.feed(id).await.unwrap();
        assert_eq!(bus.sent(), vec![
            Command::move_feed_forward(1, 40).to_hex(),
            Command::move_feed_status(1).to_hex(),
            ]);
    });
}

#[test]
fn feed_checks_location_before_moving() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;

        controller.slots().set_location(1, None);
        assert!(matches!(controller.feed(id).await, Err(Error::UnconfiguredSlot(1))));
        assert!(bus.sent().is_empty());

        controller.slots().set_location(1, Some(Location::ORIGIN));
        controller.registry().update(id, |feeder| feeder.set_offset(None)).unwrap();
        assert!(matches!(controller.feed(id).await, Err(Error::NoLocationOffset(_))));
        assert!(bus.sent().is_empty());
    });
}

#[test]
fn feed_recovers_once_from_uninitialized() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        bus.reply_once(&Command::move_feed_forward(1, 40),
            Response::UninitializedFeeder {address: 1, hardware_id: hardware_id(A)});
        bus.reply(&Command::move_feed_forward(1, 40), feeding(1));
        bus.reply(&Command::move_feed_status(1), done(1));

        controller.feed(id).await.unwrap();
        assert_eq!(bus.sent(), vec![
            Command::move_feed_forward(1, 40).to_hex(),
            Command::initialize_feeder(1, hardware_id(A)).to_hex(),
            Command::move_feed_forward(1, 40).to_hex(),
            Command::move_feed_status(1).to_hex(),
            ]);
        assert!(controller.registry().get(id).unwrap().is_initialized());
    });
}

#[test]
fn feed_fails_when_still_uninitialized() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        bus.reply(&Command::move_feed_forward(1, 40),
            Response::UninitializedFeeder {address: 1, hardware_id: hardware_id(A)});

        let result = controller.feed(id).await;
        assert!(matches!(result, Err(Error::FeedFailure(FeedFailure::Uninitialized))));
        assert_eq!(bus.count(&Command::move_feed_forward(1, 40)), 2);
        assert!(!controller.registry().get(id).unwrap().is_initialized());
    });
}

#[test]
fn feed_follows_moved_feeder() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        controller.slots().set_location(6, Some(Location::ORIGIN));
        bus.reply_once(&Command::move_feed_forward(1, 40),
            Response::WrongFeederUuid {address: 1, hardware_id: hardware_id(B)});
        reachable(&bus, hardware_id(A), 6);
        bus.reply(&Command::move_feed_forward(6, 40), feeding(6));
        bus.reply(&Command::move_feed_status(6), done(6));

        controller.feed(id).await.unwrap();
        assert_eq!(controller.registry().get(id).unwrap().slot_address(), Some(6));
        let other = controller.registry().find_by_slot_address(1).unwrap();
        assert_eq!(controller.registry().get(other).unwrap().hardware_id(), Some(hardware_id(B)));
    });
}

#[test]
fn feed_timeout_is_not_retried() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        bus.timeout(&Command::move_feed_forward(1, 40));

        let result = controller.feed(id).await;
        assert!(matches!(result, Err(Error::FeedFailure(FeedFailure::Timeout))));
        assert_eq!(bus.sent().len(), 1);
        // next operation will have to find the feeder again
        assert_eq!(controller.registry().get(id).unwrap().state(), FeederState::AddressUnknown);
    });
}

#[test]
fn feed_corrupt_reply_is_not_retried() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        bus.reply_raw(&Command::move_feed_forward(1, 40), CORRUPT);

        let result = controller.feed(id).await;
        assert!(matches!(result, Err(Error::FeedFailure(FeedFailure::Corrupt(DecodeError::Checksum {..})))));
        assert_eq!(bus.sent(), vec![Command::move_feed_forward(1, 40).to_hex()]);
        assert_eq!(controller.registry().get(id).unwrap().state(), FeederState::AddressUnknown);
    });
}

#[test]
fn feed_status_polling_tolerates_corrupt_replies() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        bus.reply(&Command::move_feed_forward(1, 40), feeding(1));
        bus.reply_raw_once(&Command::move_feed_status(1), CORRUPT);
        bus.reply_raw_once(&Command::move_feed_status(1), "garbage");
        bus.reply(&Command::move_feed_status(1), done(1));
        controller.feed(id).await.unwrap();
        assert_eq!(bus.count(&Command::move_feed_status(1)), 3);

        bus.clear_history();
        bus.reply_raw(&Command::move_feed_status(1), CORRUPT);
        let result = controller.feed(id).await;
        assert!(matches!(result, Err(Error::FeedFailure(FeedFailure::StatusTimeout))));
        assert_eq!(bus.count(&Command::move_feed_status(1)), 3);
        // the feeder keeps its address, only the motion outcome is unknown
        assert_eq!(controller.registry().get(id).unwrap().slot_address(), Some(1));
    });
}

#[test]
fn feed_status_polling() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        bus.reply(&Command::move_feed_forward(1, 40), feeding(1));
        bus.reply_once(&Command::move_feed_status(1), Response::Timeout);
        bus.reply_once(&Command::move_feed_status(1), Response::Timeout);
        bus.reply(&Command::move_feed_status(1), done(1));
        controller.feed(id).await.unwrap();
        assert_eq!(bus.count(&Command::move_feed_status(1)), 3);

        bus.clear_history();
        bus.timeout(&Command::move_feed_status(1));
        let result = controller.feed(id).await;
        assert!(matches!(result, Err(Error::FeedFailure(FeedFailure::StatusTimeout))));
        assert_eq!(bus.count(&Command::move_feed_status(1)), 3);

        bus.reply(&Command::move_feed_status(1), Response::CouldNotReachTarget {address: 1});
        let result = controller.feed(id).await;
        assert!(matches!(result, Err(Error::FeedFailure(FeedFailure::CouldNotReachTarget))));
    });
}

#[test]
fn feed_options() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;

        assert!(controller.take_back_part(id).unwrap());
        assert!(!controller.take_back_part(id).unwrap());
        controller.feed(id).await.unwrap();
        assert!(bus.sent().is_empty());
        assert_eq!(controller.registry().get(id).unwrap().feed_options(), FeedOptions::Normal);

        controller.registry().update(id, |feeder| feeder.set_feed_options(FeedOptions::Disable)).unwrap();
        controller.feed(id).await.unwrap();
        controller.feed(id).await.unwrap();
        assert!(bus.sent().is_empty());
    });
}

#[test]
fn feed_nudges_by_vision_correction() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        controller.registry().update(id, |feeder| feeder.set_offset(Some(Location::new(1., 1., 0., 0.)))).unwrap();

        controller.apply_vision_correction(id, Location::new(0., 0.4, 0., 0.)).unwrap();
        assert_eq!(controller.registry().get(id).unwrap().pick_correction().y, 0.2);

        // tape advances 0.2mm less to compensate
        bus.reply(&Command::move_feed_forward(1, 38), feeding(1));
        bus.reply(&Command::move_feed_status(1), done(1));
        controller.feed(id).await.unwrap();
        assert_eq!(bus.count(&Command::move_feed_forward(1, 38)), 1);
        assert_eq!(controller.registry().get(id).unwrap().pick_correction().y, 0.);
    });
}

#[test]
fn feed_one_mm_and_backward() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        bus.reply(&Command::move_feed_forward(1, 10), feeding(1));
        bus.reply(&Command::move_feed_backward(1, 25), feeding(1));
        bus.reply(&Command::move_feed_status(1), done(1));

        controller.feed_one_mm(id).await.unwrap();
        controller.move_backward(id, 25).await.unwrap();
        assert_eq!(bus.count(&Command::move_feed_forward(1, 10)), 1);
        assert_eq!(bus.count(&Command::move_feed_backward(1, 25)), 1);
    });
}

#[test]
fn feed_distance_must_fit() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        controller.registry().update(id, |feeder| feeder.set_part_pitch(32)).unwrap();
        assert!(matches!(controller.feed(id).await, Err(Error::FeedDistance(320))));
        assert!(bus.sent().is_empty());
    });
}

#[test]
fn version() {
    test(async {
        let (controller, bus) = controller();
        let id = ready(&controller, &bus, 1).await;
        bus.reply(&Command::get_version(1), Response::Ok {address: 1, payload: Payload::Version(1)});
        assert_eq!(controller.version(id).await.unwrap(), 1);
    });
}

#[test]
fn names_carry_slot() {
    let mut feeder = Feeder::with_hardware_id(hardware_id(A));
    assert_eq!(feeder.name(), format!("{} (Slot: None)", A));
    feeder.set_name("8mm resistors (Slot: 3)");
    assert_eq!(feeder.label(), "8mm resistors");
    assert_eq!(feeder.name(), "8mm resistors (Slot: None)");
    feeder.set_name("tape (Slot: ) (Slot: 3)");
    assert_eq!(feeder.label(), "tape (Slot: )");
    assert_eq!(Feeder::new().name(), "Unconfigured feeder");
}
