//! Sessions against an emulated secure element

mod common;

mod tests {
    use hex_literal::hex;
    use nexum_se_core::{ApduTransceive, Command, ErrorKind, ProtocolStack, StatusWord};
    use nexum_se_scp03::{Scp03, Scp03Config, SecurityLevel, StaticKeys, logical_channel_cla};

    use super::common::*;

    fn stack(card: Card) -> ProtocolStack {
        ProtocolStack::new(Scp03::new(card))
    }

    fn stack_with_config(card: Card, config: Scp03Config) -> ProtocolStack {
        ProtocolStack::new(Scp03::with_config(card, config))
    }

    fn scp(stack: &mut ProtocolStack) -> &mut Scp03 {
        stack.find_layer_mut::<Scp03>().unwrap()
    }

    fn card(stack: &ProtocolStack) -> &Card {
        stack.find_layer::<Card>().unwrap()
    }

    fn get_data() -> Command {
        Command::new_with_le(0x80, 0xCA, 0x00, 0x66, 0x100)
    }

    #[test]
    fn full_protection_round_trip() {
        let mut stack = stack(Card::new(zero_keys()));
        scp(&mut stack).open(&zero_keys(), SecurityLevel::full()).unwrap();
        assert_eq!(scp(&mut stack).security_level(), SecurityLevel::full());

        for counter in 1..=3 {
            assert_eq!(scp(&mut stack).sequence_counter(), counter);
            let response = stack.transceive_apdu(&get_data()).unwrap();
            assert!(response.is_success());
            assert_eq!(response.payload().as_ref(), hex!("0102"));
        }

        assert_eq!(scp(&mut stack).sequence_counter(), 4);
        assert_eq!(card(&stack).counter(), 4);
    }

    #[test]
    fn command_data_is_encrypted_on_the_wire() {
        let mut stack = stack(Card::new(zero_keys()));
        scp(&mut stack).open(&zero_keys(), SecurityLevel::c_enc()).unwrap();

        let command = Command::new_with_data(0x80, 0xE2, 0x90, 0x00, hex!("11223344").to_vec());
        stack.transceive_apdu(&command).unwrap();

        let received = &card(&stack).received[0];
        assert_eq!(received.cla, 0x84);
        assert_eq!(received.data(), hex!("11223344"));
    }

    #[test]
    fn response_encryption() {
        let mut card = Card::new(zero_keys());
        card.payload = (0u8..40).collect();
        let mut stack = stack(card);
        scp(&mut stack).open(&zero_keys(), SecurityLevel::full()).unwrap();

        let response = stack.transceive_apdu(&get_data()).unwrap();
        assert_eq!(response.payload().as_ref(), (0u8..40).collect::<Vec<_>>());
    }

    #[test]
    fn no_protection_after_authentication() {
        let mut stack = stack(Card::new(zero_keys()));
        scp(&mut stack).open(&zero_keys(), SecurityLevel::none()).unwrap();
        assert!(scp(&mut stack).is_authenticated());

        let command = Command::new_with_data(0x80, 0xE2, 0x90, 0x00, hex!("aa").to_vec());
        stack.transceive_apdu(&command).unwrap();

        let received = &card(&stack).received[0];
        assert_eq!(received.cla, 0x80);
        assert_eq!(received.data(), hex!("aa"));
    }

    #[test]
    fn rmac_session() {
        let mut stack = stack(Card::new(zero_keys()));
        scp(&mut stack).open(&zero_keys(), SecurityLevel::c_mac()).unwrap();

        scp(&mut stack).begin_rmac_session(SecurityLevel::r_mac(), &[]).unwrap();
        assert_eq!(scp(&mut stack).security_level().bits(), 0x11);
        assert_eq!(card(&stack).response_level(), 0x10);

        // Responses now carry a MAC
        let response = stack.transceive_apdu(&get_data()).unwrap();
        assert_eq!(response.payload().as_ref(), hex!("0102"));

        let err = scp(&mut stack).begin_rmac_session(SecurityLevel::r_mac(), &[]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::SessionAlreadyActive);

        let data = scp(&mut stack).end_rmac_session().unwrap();
        assert_eq!(data.as_ref(), hex!("5aa5"));
        assert_eq!(scp(&mut stack).security_level(), SecurityLevel::c_mac());
        assert_eq!(card(&stack).response_level(), 0x00);

        let err = scp(&mut stack).end_rmac_session().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidState);
    }

    #[test]
    fn rmac_session_needs_command_protection() {
        let mut stack = stack(Card::new(zero_keys()));
        scp(&mut stack).open(&zero_keys(), SecurityLevel::c_mac()).unwrap();

        let err = scp(&mut stack).begin_rmac_session(SecurityLevel::r_enc(), &[]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::SecurityLevelViolation);
        assert_eq!(err.code().reason(), 0x03);
        assert!(card(&stack).received.is_empty());
    }

    #[test]
    fn wrong_static_keys() {
        let mut stack = stack(Card::new(StaticKeys::from_single_key(&[0x01u8; 32]).unwrap()));
        let err = scp(&mut stack).open(&zero_keys(), SecurityLevel::full()).unwrap_err();

        assert_eq!(err.kind(), &ErrorKind::AuthenticationFailed);
        assert!(!scp(&mut stack).is_authenticated());
        assert!(scp(&mut stack).session_keys().is_none());
    }

    #[test]
    fn host_cryptogram_rejected() {
        let mut card = Card::new(zero_keys());
        card.external_authenticate_status = Some(hex!("6300"));
        let mut stack = stack(card);

        let err = scp(&mut stack).open(&zero_keys(), SecurityLevel::full()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::AuthenticationFailed);
        assert_eq!(err.code().reason(), 0x02);
        assert!(!scp(&mut stack).is_authenticated());
        assert_eq!(scp(&mut stack).sequence_counter(), 0);
    }

    #[test]
    fn external_authenticate_error_status() {
        let mut card = Card::new(zero_keys());
        card.external_authenticate_status = Some(hex!("6985"));
        let mut stack = stack(card);

        let err = scp(&mut stack).open(&zero_keys(), SecurityLevel::full()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Status(StatusWord::from_u16(0x6985)));
        assert_eq!(err.code().reason(), 0x8c);
        assert!(!scp(&mut stack).is_authenticated());
    }

    #[test]
    fn unknown_key_set() {
        let mut card = Card::new(zero_keys());
        card.initialize_update_status = Some(hex!("6a88"));
        let mut stack = stack_with_config(card, Scp03Config::default().with_key(0x31, 0x01));

        let err = scp(&mut stack).open(&zero_keys(), SecurityLevel::full()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ReferencedDataNotFound);
    }

    #[test]
    fn initialize_update_error_status() {
        let mut card = Card::new(zero_keys());
        card.initialize_update_status = Some(hex!("6982"));
        let mut stack = stack(card);

        let err = scp(&mut stack).initialize_update(0, 0, 0).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Status(StatusWord::from_u16(0x6982)));
        assert_eq!(err.code().reason(), 0x8b);
    }

    #[test]
    fn pseudo_random_card_challenge() {
        let mut card = Card::new(zero_keys());
        card.scp_parameter = 0x10;
        let mut stack = stack(card);

        scp(&mut stack).open(&zero_keys(), SecurityLevel::c_mac()).unwrap();
        let response = scp(&mut stack).initialize_update_response().unwrap();
        assert!(response.key_information.pseudo_random_challenge());
        assert_eq!(response.sequence_counter, Some(hex!("00002a")));
    }

    #[test]
    fn tampered_response_mac_ends_session() {
        let mut stack = stack(Card::new(zero_keys()));
        scp(&mut stack).open(&zero_keys(), SecurityLevel::full()).unwrap();
        stack.find_layer_mut::<Card>().unwrap().tamper_rmac = true;

        let err = stack.transceive_apdu(&get_data()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::AuthenticationFailed);

        let scp = scp(&mut stack);
        assert!(!scp.is_authenticated());
        assert_eq!(scp.sequence_counter(), 0);
        assert_eq!(scp.security_level(), SecurityLevel::none());

        let err = scp.secure_transceive(&get_data()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidState);
    }

    #[test]
    fn further_logical_channel() {
        let mut stack = stack_with_config(Card::new(zero_keys()), Scp03Config::default().with_channel(5));
        scp(&mut stack).open(&zero_keys(), SecurityLevel::full()).unwrap();
        assert_eq!(scp(&mut stack).logical_channel(), 5);

        let cla = logical_channel_cla(0x80, 5).unwrap();
        let response = stack.transceive_apdu(&Command::new_with_le(cla, 0xCA, 0x00, 0x66, 0x100)).unwrap();
        assert_eq!(response.payload().as_ref(), hex!("0102"));
        assert_eq!(card(&stack).received[0].cla, 0xe1);
    }

    #[test]
    fn reactivation_ends_session() {
        let mut stack = stack(Card::new(zero_keys()));
        scp(&mut stack).open(&zero_keys(), SecurityLevel::full()).unwrap();

        // The emulator has no base layer to activate
        assert!(stack.activate().is_err());
        assert!(!scp(&mut stack).is_authenticated());
    }
}
