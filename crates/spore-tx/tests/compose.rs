mod common;

use std::collections::HashSet;

use common::{
    MockChain, cluster_cell, config, config_with_cobuild, lock, mutant_cell, spore_cell, text_spore,
};
use spore_tx::assembly::{
    BalancePath, ClusterLink, ClusterOutputRequest, FundingSource, InputOptions, SporeOutputRequest,
    assert_capacity_conservation, calculate_fee, inject_melt_spore,
};
use spore_tx::cobuild::{SporeAction, decode_actions, encode_actions, find_cobuild_proof};
use spore_tx::compose::{
    ComposeOptions, Composed, ExtraCells, ExtraInput, FeeSource, MeltTarget, TransferTarget,
    create_cluster, create_multiple_spores, create_spore, melt_multiple_then_create_spore,
    melt_spore, melt_then_create_spore, transfer_multiple_spores, transfer_spore,
};
use spore_tx::config::FeeRatePolicy;
use spore_tx::data::{ClusterData, SporeData};
use spore_tx::error::SporeError;
use spore_tx::provider::resolve_live_cell;
use spore_tx::scripts::derive_type_id;
use spore_tx::skeleton::TransactionSkeleton;
use spore_tx::types::{Cell, CellDep, DepType, ONE_CKB, OutPoint};

/// Exact conservation and the fee formula at the rate in effect.
fn assert_balanced(composed: &Composed) {
    assert_capacity_conservation(&composed.skeleton, composed.fee).expect("capacity is conserved");
    if composed.path.is_some() {
        let expected = calculate_fee(composed.skeleton.serialized_size(), composed.fee_rate).expect("fee");
        assert_eq!(composed.fee, expected);
    }
}

fn kinds(composed: &Composed) -> Vec<&'static str> {
    composed
        .actions
        .iter()
        .map(|action| match action.spore_action().expect("valid action") {
            SporeAction::MintSpore { .. } => "mint-spore",
            SporeAction::TransferSpore { .. } => "transfer-spore",
            SporeAction::BurnSpore { .. } => "burn-spore",
            SporeAction::MintCluster { .. } => "mint-cluster",
            SporeAction::TransferCluster { .. } => "transfer-cluster",
            SporeAction::TransferAgent { .. } => "transfer-agent",
        })
        .collect()
}

fn anchor(composed: &Composed) -> OutPoint {
    composed.skeleton.first_input_out_point().expect("anchor input")
}

#[test]
fn mint_one_byte_spore_under_lock() {
    let config = config();
    let owner = lock(0x11);
    let payer = lock(0x22);
    let mut chain = MockChain::new();
    chain.fund(&payer, 1000 * ONE_CKB);

    let request = SporeOutputRequest::new(text_spore(1), owner.clone());
    let options = ComposeOptions::funded_by(vec![FundingSource::new(payer.clone())]);
    let composed = create_spore(&chain, &request, &options, &config).expect("spore created");

    assert_eq!(composed.spore_outputs, vec![0]);
    let spore = &composed.skeleton.outputs()[0];
    assert_eq!(spore.lock, owner);
    assert!(spore.capacity >= ONE_CKB);
    assert_eq!(spore.capacity, spore.occupied_capacity().expect("occupied") + ONE_CKB);

    let spore_id = derive_type_id(&anchor(&composed), 0);
    assert_eq!(composed.spore_ids, vec![spore_id]);
    assert_eq!(spore.type_script.as_ref().expect("typed").args, spore_id.to_vec());

    assert_eq!(composed.actions.len(), 1);
    match composed.actions[0].spore_action().expect("valid action") {
        SporeAction::MintSpore {
            spore_id: minted,
            to,
            ..
        } => {
            assert_eq!(minted, spore_id);
            assert_eq!(to, owner);
        }
        other => panic!("unexpected action: {other:?}"),
    }
    assert_eq!(
        find_cobuild_proof(&composed.skeleton).expect("decodes"),
        Some(composed.actions.clone())
    );

    assert_eq!(composed.path, Some(BalancePath::Collected));
    assert_eq!(composed.change_output_index, Some(1));
    assert_eq!(composed.skeleton.outputs()[1].lock, payer);
    assert_balanced(&composed);
}

#[test]
fn transfer_pays_fee_from_own_margin() {
    let config = config();
    let sender = lock(0x11);
    let receiver = lock(0x33);
    let mut chain = MockChain::new();
    let spore = chain.add_live(spore_cell(&config, &sender, &text_spore(1), [7; 32], 200 * ONE_CKB));

    let composed = transfer_spore(
        &chain,
        &TransferTarget::new(spore, receiver.clone()),
        &ComposeOptions::default(),
        &config,
    )
    .expect("spore transferred");

    assert_eq!(composed.skeleton.inputs().len(), 1);
    assert_eq!(composed.transfers, vec![(0, 0)]);
    assert_eq!(composed.path, None);
    assert_eq!(composed.fee_output_index, Some(0));
    assert_eq!(*chain.collect_calls.borrow(), 0);

    let output = &composed.skeleton.outputs()[0];
    assert_eq!(output.lock, receiver);
    assert_eq!(output.capacity, 200 * ONE_CKB - composed.fee);
    assert_eq!(
        composed.fee,
        calculate_fee(composed.skeleton.serialized_size(), 1000).expect("fee")
    );

    match composed.actions.as_slice() {
        [action] => match action.spore_action().expect("valid action") {
            SporeAction::TransferSpore { spore_id, from, to } => {
                assert_eq!(spore_id, [7; 32]);
                assert_eq!(from, sender);
                assert_eq!(to, receiver);
            }
            other => panic!("unexpected action: {other:?}"),
        },
        other => panic!("unexpected actions: {other:?}"),
    }
    assert_balanced(&composed);
}

#[test]
fn multi_transfer_takes_fee_from_first_output_with_margin() {
    let config = config();
    let sender = lock(0x11);
    let receiver = lock(0x33);
    let mut chain = MockChain::new();
    // exactly its occupied capacity, no margin to spare
    let tight = chain.add_live(spore_cell(&config, &sender, &text_spore(1), [1; 32], 161 * ONE_CKB));
    let roomy = chain.add_live(spore_cell(&config, &sender, &text_spore(1), [2; 32], 170 * ONE_CKB));

    let targets = [
        TransferTarget::new(tight, receiver.clone()),
        TransferTarget::new(roomy, receiver),
    ];
    let composed =
        transfer_multiple_spores(&chain, &targets, &ComposeOptions::default(), &config).expect("transferred");

    assert_eq!(composed.transfers, vec![(0, 0), (1, 1)]);
    assert_eq!(composed.fee_output_index, Some(1));
    assert_eq!(composed.skeleton.outputs()[0].capacity, 161 * ONE_CKB);
    assert_eq!(kinds(&composed), vec!["transfer-spore", "transfer-spore"]);
    assert_balanced(&composed);
}

#[test]
fn transfer_without_margin_reports_insufficient_funding() {
    let config = config();
    let mut chain = MockChain::new();
    let spore = chain.add_live(spore_cell(&config, &lock(0x11), &text_spore(1), [1; 32], 161 * ONE_CKB));

    match transfer_spore(
        &chain,
        &TransferTarget::new(spore, lock(0x33)),
        &ComposeOptions::default(),
        &config,
    ) {
        Err(SporeError::InsufficientFunding { available, .. }) => assert_eq!(available, 0),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn melting_immortal_spore_is_a_policy_violation() {
    let config = config();
    let owner = lock(0x11);
    let mut chain = MockChain::new();
    let immortal = SporeData::new("text/plain;immortal=true", b"forever".to_vec());
    let protected = chain.add_live(spore_cell(&config, &owner, &immortal, [3; 32], 500 * ONE_CKB));
    let mortal = chain.add_live(spore_cell(&config, &owner, &text_spore(1), [4; 32], 500 * ONE_CKB));

    match melt_spore(&chain, &MeltTarget::new(protected), &ComposeOptions::default(), &config) {
        Err(SporeError::PolicyViolation(message)) => assert!(message.contains("immortal")),
        other => panic!("unexpected result: {other:?}"),
    }

    // rejected even when listed after a meltable spore
    let melts = [MeltTarget::new(mortal), MeltTarget::new(protected)];
    let request = SporeOutputRequest::new(text_spore(1), owner.clone());
    assert!(matches!(
        melt_multiple_then_create_spore(&chain, &melts, &request, &ComposeOptions::default(), &config),
        Err(SporeError::PolicyViolation(_))
    ));

    let mut skeleton = TransactionSkeleton::new();
    let cell = resolve_live_cell(&chain, &protected).expect("live");
    let result = inject_melt_spore(&mut skeleton, cell, &InputOptions::default(), &config);
    assert!(matches!(result, Err(SporeError::PolicyViolation(_))));
    assert_eq!(skeleton, TransactionSkeleton::new());
}

#[test]
fn transfer_with_prefix_input_returns_surplus_as_change() {
    let config = config();
    let sender = lock(0x11);
    let receiver = lock(0x33);
    let sponsor = lock(0x44);
    let mut chain = MockChain::new();
    let spore = chain.add_live(spore_cell(&config, &sender, &text_spore(1), [7; 32], 200 * ONE_CKB));
    let options = ComposeOptions {
        prefix: ExtraCells {
            inputs: vec![ExtraInput::new(
                Cell::new(500 * ONE_CKB, sponsor.clone(), None, Vec::new())
                    .with_out_point(OutPoint::new([0x5A; 32], 0)),
            )],
            outputs: Vec::new(),
        },
        ..ComposeOptions::default()
    };

    let composed =
        transfer_spore(&chain, &TransferTarget::new(spore, receiver.clone()), &options, &config).expect("transferred");

    assert_eq!(composed.path, Some(BalancePath::Redeemed));
    assert_eq!(composed.fee_output_index, None);
    let change_index = composed.change_output_index.expect("change");
    let change = &composed.skeleton.outputs()[change_index];
    assert_eq!(change.lock, sponsor);
    assert_eq!(change.capacity, 500 * ONE_CKB - composed.fee);
    assert_eq!(composed.transfers, vec![(1, 0)]);
    assert_eq!(composed.skeleton.outputs()[0].capacity, 200 * ONE_CKB);
    assert_eq!(composed.skeleton.outputs()[0].lock, receiver);
    assert_eq!(
        composed.fee,
        calculate_fee(composed.skeleton.serialized_size(), 1000).expect("fee")
    );
    assert_balanced(&composed);
}

#[test]
fn resized_transfer_cannot_pay_from_its_margin() {
    let config = config();
    let mut chain = MockChain::new();
    let spore = chain.add_live(spore_cell(&config, &lock(0x11), &text_spore(1), [7; 32], 300 * ONE_CKB));
    let mut target = TransferTarget::new(spore, lock(0x33));
    target.capacity_margin = Some(ONE_CKB);

    for fee_source in [None, Some(FeeSource::OutputMargin)] {
        let options = ComposeOptions {
            fee_source,
            ..ComposeOptions::default()
        };
        match transfer_spore(&chain, &target, &options, &config) {
            Err(SporeError::InvalidRequest(message)) => assert!(message.contains("resized")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    // with a funding source the freed capacity becomes change
    let options = ComposeOptions::funded_by(vec![FundingSource::new(lock(0x11))]);
    let composed = transfer_spore(&chain, &target, &options, &config).expect("transferred");
    assert_eq!(composed.path, Some(BalancePath::Redeemed));
    assert_balanced(&composed);
}

#[test]
fn transfer_without_margin_needs_a_funding_source() {
    let config = config();
    let mut chain = MockChain::new();
    let spore = chain.add_live(spore_cell(&config, &lock(0x11), &text_spore(1), [7; 32], 300 * ONE_CKB));
    let options = ComposeOptions::funded_by(Vec::new());

    match transfer_spore(&chain, &TransferTarget::new(spore, lock(0x33)), &options, &config) {
        Err(SporeError::InvalidRequest(message)) => assert!(message.contains("funding source")),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(*chain.collect_calls.borrow(), 0);
}

#[test]
fn output_margin_needs_an_output_to_pay_from() {
    let config = config();
    let mut chain = MockChain::new();
    let spore = chain.add_live(spore_cell(&config, &lock(0x11), &text_spore(1), [4; 32], 500 * ONE_CKB));
    let options = ComposeOptions {
        fee_source: Some(FeeSource::OutputMargin),
        ..ComposeOptions::default()
    };

    match melt_spore(&chain, &MeltTarget::new(spore), &options, &config) {
        Err(SporeError::InvalidRequest(message)) => assert!(message.contains("margin")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn mutant_spore_pays_the_mutant_owner() {
    let config = config();
    let owner = lock(0x11);
    let payer = lock(0x22);
    let artist = lock(0x88);
    let mutant_id = [0xEE; 32];
    let mut chain = MockChain::new();
    chain.fund(&payer, 1000 * ONE_CKB);
    let mutant = chain.add_live(mutant_cell(&config, &artist, mutant_id, Some(150 * ONE_CKB)));

    let data = SporeData::new(format!("text/plain;mutant[]={}", hex::encode(mutant_id)), vec![1]);
    let request = SporeOutputRequest::new(data, owner);
    let options = ComposeOptions::funded_by(vec![FundingSource::new(payer.clone())]);
    let composed = create_spore(&chain, &request, &options, &config).expect("created");

    assert_eq!(composed.spore_outputs, vec![0]);
    assert_eq!(composed.payment_outputs, vec![1]);
    let payment = &composed.skeleton.outputs()[1];
    assert_eq!(payment.lock, artist);
    assert_eq!(payment.capacity, 150 * ONE_CKB);
    assert!(composed.skeleton.cell_deps().contains(&CellDep::new(mutant, DepType::Code)));
    assert!(composed.skeleton.inputs().iter().all(|cell| cell.out_point != Some(mutant)));
    assert_eq!(composed.change_output_index, Some(2));
    assert_eq!(composed.skeleton.outputs()[2].lock, payer);
    assert_eq!(kinds(&composed), vec!["mint-spore"]);
    assert_balanced(&composed);
}

#[test]
fn melt_returns_capacity_as_change() {
    let config = config();
    let owner = lock(0x11);
    let mut chain = MockChain::new();
    let spore = chain.add_live(spore_cell(&config, &owner, &text_spore(1), [5; 32], 300 * ONE_CKB));

    let composed =
        melt_spore(&chain, &MeltTarget::new(spore), &ComposeOptions::default(), &config).expect("melted");

    assert_eq!(composed.melted_inputs, vec![0]);
    assert_eq!(composed.path, Some(BalancePath::Redeemed));
    assert_eq!(composed.skeleton.outputs().len(), 1);
    let change = &composed.skeleton.outputs()[0];
    assert_eq!(change.lock, owner);
    assert_eq!(change.capacity, 300 * ONE_CKB - composed.fee);
    assert_eq!(kinds(&composed), vec!["burn-spore"]);
    assert_balanced(&composed);
}

#[test]
fn melt_then_create_redeems_surplus_with_one_change_output() {
    let config = config();
    let owner = lock(0x11);
    let mut chain = MockChain::new();
    let melted = chain.add_live(spore_cell(&config, &owner, &text_spore(1), [6; 32], 1000 * ONE_CKB));

    let request = SporeOutputRequest::new(text_spore(1), owner.clone());
    let composed = melt_then_create_spore(
        &chain,
        &MeltTarget::new(melted),
        &request,
        &ComposeOptions::default(),
        &config,
    )
    .expect("melted and created");

    assert_eq!(composed.path, Some(BalancePath::Redeemed));
    assert_eq!(composed.skeleton.inputs().len(), 1);
    assert_eq!(composed.skeleton.outputs().len(), 2);
    assert_eq!(composed.change_output_index, Some(1));
    assert_eq!(*chain.collect_calls.borrow(), 0);

    assert_eq!(anchor(&composed), melted);
    assert_eq!(composed.spore_ids, vec![derive_type_id(&melted, 0)]);
    assert_eq!(kinds(&composed), vec!["burn-spore", "mint-spore"]);
    assert_balanced(&composed);
}

#[test]
fn melt_then_create_collects_when_melted_capacity_is_short() {
    let config = config();
    let owner = lock(0x11);
    let payer = lock(0x22);
    let mut chain = MockChain::new();
    let melted = chain.add_live(spore_cell(&config, &owner, &text_spore(1), [6; 32], 161 * ONE_CKB));
    chain.fund(&payer, 500 * ONE_CKB);

    let request = SporeOutputRequest::new(text_spore(1), owner);
    let options = ComposeOptions::funded_by(vec![FundingSource::new(payer.clone())]);
    let composed = melt_then_create_spore(&chain, &MeltTarget::new(melted), &request, &options, &config)
        .expect("melted and created");

    assert_eq!(composed.path, Some(BalancePath::Collected));
    assert!(composed.skeleton.inputs().len() > 1);
    assert_eq!(anchor(&composed), melted);
    let change_index = composed.change_output_index.expect("change");
    assert_eq!(composed.skeleton.outputs()[change_index].lock, payer);
    assert_balanced(&composed);
}

#[test]
fn melted_surplus_below_change_minimum_still_collects() {
    let config = config();
    let owner = lock(0x11);
    let payer = lock(0x22);
    let mut chain = MockChain::new();
    let first = chain.add_live(spore_cell(&config, &owner, &text_spore(1), [1; 32], 161 * ONE_CKB));
    let second = chain.add_live(spore_cell(&config, &owner, &text_spore(1), [2; 32], 161 * ONE_CKB));
    chain.fund(&payer, 500 * ONE_CKB);

    // 311 units out of 322 melted, leaving less than a change cell needs
    let request = SporeOutputRequest::new(text_spore(150), owner);
    let options = ComposeOptions::funded_by(vec![FundingSource::new(payer)]);
    let melts = [MeltTarget::new(first), MeltTarget::new(second)];
    let composed =
        melt_multiple_then_create_spore(&chain, &melts, &request, &options, &config).expect("composed");

    assert_eq!(composed.skeleton.outputs()[0].capacity, 311 * ONE_CKB);
    assert_eq!(composed.path, Some(BalancePath::Collected));
    assert_eq!(composed.skeleton.inputs().len(), 3);
    assert_eq!(composed.melted_inputs, vec![0, 1]);
    assert_eq!(kinds(&composed), vec!["burn-spore", "burn-spore", "mint-spore"]);
    assert_balanced(&composed);
}

#[test]
fn missing_and_spent_cells_are_reported() {
    let config = config();
    let mut chain = MockChain::new();
    let unknown = chain.unknown_out_point();
    let spent = chain.add_live(spore_cell(&config, &lock(0x11), &text_spore(1), [1; 32], 200 * ONE_CKB));
    chain.spend(&spent);

    match melt_spore(&chain, &MeltTarget::new(unknown), &ComposeOptions::default(), &config) {
        Err(SporeError::CellNotFound(out_point)) => assert_eq!(out_point, unknown),
        other => panic!("unexpected result: {other:?}"),
    }
    match transfer_spore(
        &chain,
        &TransferTarget::new(spent, lock(0x33)),
        &ComposeOptions::default(),
        &config,
    ) {
        Err(SporeError::AlreadySpent(out_point)) => assert_eq!(out_point, spent),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn oversized_transaction_is_rejected() {
    let mut config = config();
    config.max_transaction_size = Some(1000);
    let payer = lock(0x22);
    let mut chain = MockChain::new();
    chain.fund(&payer, 10_000 * ONE_CKB);

    let request = SporeOutputRequest::new(text_spore(2000), lock(0x11));
    let options = ComposeOptions::funded_by(vec![FundingSource::new(payer)]);
    match create_spore(&chain, &request, &options, &config) {
        Err(SporeError::OversizedTransaction { size, limit }) => {
            assert_eq!(limit, 1000);
            assert!(size > 2000);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn unfunded_mint_reports_insufficient_funding() {
    let config = config();
    let payer = lock(0x22);
    let mut chain = MockChain::new();
    chain.fund(&payer, 100 * ONE_CKB);

    let request = SporeOutputRequest::new(text_spore(1), lock(0x11));
    let options = ComposeOptions::funded_by(vec![FundingSource::new(payer)]);
    match create_spore(&chain, &request, &options, &config) {
        Err(SporeError::InsufficientFunding { required, available }) => {
            assert_eq!(available, 100 * ONE_CKB);
            assert!(required > 162 * ONE_CKB);
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn spores_linked_to_one_cluster_share_its_transfer_action() {
    let config = config();
    let owner = lock(0x11);
    let payer = lock(0x22);
    let cluster_id = [0xC1; 32];
    let mut chain = MockChain::new();
    let cluster = chain.add_live(cluster_cell(
        &config,
        &owner,
        &ClusterData::new("garden", "plants"),
        cluster_id,
        300 * ONE_CKB,
    ));
    chain.fund(&payer, 1000 * ONE_CKB);

    let linked = |content_len| {
        let mut request =
            SporeOutputRequest::new(text_spore(content_len).with_cluster_id(cluster_id), owner.clone());
        request.cluster_link = Some(ClusterLink::Cluster { cluster });
        request
    };
    let options = ComposeOptions::funded_by(vec![FundingSource::new(payer)]);
    let composed =
        create_multiple_spores(&chain, &[linked(1), linked(2)], &options, &config).expect("created");

    assert_eq!(kinds(&composed), vec!["transfer-cluster", "mint-spore", "mint-spore"]);
    assert_eq!(anchor(&composed), cluster);
    assert_eq!(composed.spore_outputs, vec![1, 2]);
    let cluster_output = &composed.skeleton.outputs()[0];
    assert_eq!(cluster_output.capacity, 300 * ONE_CKB);
    assert_eq!(
        composed.skeleton.inputs().iter().filter(|cell| cell.out_point == Some(cluster)).count(),
        1
    );

    let ids: HashSet<_> = composed.spore_ids.iter().collect();
    assert_eq!(ids.len(), 2);
    assert_balanced(&composed);

    let encoded = encode_actions(&composed.actions).expect("packs");
    assert_eq!(decode_actions(&encoded).expect("decodes"), composed.actions);
}

#[test]
fn cluster_creation_derives_its_identifier() {
    let config = config();
    let owner = lock(0x11);
    let mut chain = MockChain::new();
    chain.fund(&owner, 1000 * ONE_CKB);

    let request = ClusterOutputRequest::new(ClusterData::new("garden", "plants"), owner.clone());
    let options = ComposeOptions::funded_by(vec![FundingSource::new(owner)]);
    let composed = create_cluster(&chain, &request, &options, &config).expect("cluster created");

    assert_eq!(composed.cluster_outputs, vec![0]);
    assert_eq!(composed.cluster_ids, vec![derive_type_id(&anchor(&composed), 0)]);
    assert_eq!(kinds(&composed), vec!["mint-cluster"]);
    assert_balanced(&composed);
}

#[test]
fn prefix_input_anchors_identifiers_and_funds_the_mint() {
    let config = config();
    let owner = lock(0x11);
    let sponsor = lock(0x44);
    let mut chain = MockChain::new();
    let sponsor_out_point = OutPoint::new([0x5A; 32], 3);
    let prefix = ExtraCells {
        inputs: vec![ExtraInput::new(
            Cell::new(500 * ONE_CKB, sponsor.clone(), None, Vec::new()).with_out_point(sponsor_out_point),
        )],
        outputs: vec![Cell::new(100 * ONE_CKB, sponsor, None, Vec::new())],
    };
    let options = ComposeOptions {
        prefix,
        ..ComposeOptions::default()
    };

    let request = SporeOutputRequest::new(text_spore(1), owner.clone());
    let composed = create_spore(&chain, &request, &options, &config).expect("created");

    assert_eq!(anchor(&composed), sponsor_out_point);
    assert_eq!(composed.spore_outputs, vec![1]);
    assert_eq!(composed.spore_ids, vec![derive_type_id(&sponsor_out_point, 1)]);
    assert_eq!(composed.path, Some(BalancePath::Redeemed));
    let change_index = composed.change_output_index.expect("change");
    assert_eq!(composed.skeleton.outputs()[change_index].lock, owner);
    assert_balanced(&composed);

    // an unrelated ledger entry never shifts the anchor
    chain.fund(&lock(0x99), 1000 * ONE_CKB);
    let again = create_spore(&chain, &request, &options, &config).expect("created again");
    assert_eq!(again.spore_ids, composed.spore_ids);
}

#[test]
fn explicit_change_lock_wins() {
    let config = config();
    let payer = lock(0x22);
    let collector = lock(0x77);
    let mut chain = MockChain::new();
    chain.fund(&payer, 1000 * ONE_CKB);

    let options = ComposeOptions {
        fee_source: Some(FeeSource::Funding {
            sources: vec![FundingSource::new(payer)],
            change_lock: Some(collector.clone()),
        }),
        ..ComposeOptions::default()
    };
    let request = SporeOutputRequest::new(text_spore(1), lock(0x11));
    let composed = create_spore(&chain, &request, &options, &config).expect("created");

    let change_index = composed.change_output_index.expect("change");
    assert_eq!(composed.skeleton.outputs()[change_index].lock, collector);
}

#[test]
fn scripts_without_cobuild_get_no_proof() {
    let config = config_with_cobuild(false);
    let payer = lock(0x22);
    let mut chain = MockChain::new();
    chain.fund(&payer, 1000 * ONE_CKB);

    let request = SporeOutputRequest::new(text_spore(1), lock(0x11));
    let options = ComposeOptions::funded_by(vec![FundingSource::new(payer)]);
    let composed = create_spore(&chain, &request, &options, &config).expect("created");

    assert!(composed.actions.is_empty());
    assert_eq!(find_cobuild_proof(&composed.skeleton).expect("decodes"), None);
    assert_eq!(composed.spore_ids.len(), 1);
    assert_balanced(&composed);
}

#[test]
fn fetched_fee_rate_of_zero_falls_back_to_minimum() {
    let mut config = config();
    config.fee_rate = FeeRatePolicy::FetchMinimum;
    let payer = lock(0x22);
    let mut chain = MockChain::new();
    chain.min_fee_rate = 0;
    chain.fund(&payer, 1000 * ONE_CKB);

    let request = SporeOutputRequest::new(text_spore(1), lock(0x11));
    let options = ComposeOptions::funded_by(vec![FundingSource::new(payer)]);
    let composed = create_spore(&chain, &request, &options, &config).expect("created");
    assert_eq!(composed.fee_rate, 1000);

    let options = ComposeOptions {
        fee_rate: Some(3000),
        ..options
    };
    let composed = create_spore(&chain, &request, &options, &config).expect("created");
    assert_eq!(composed.fee_rate, 3000);
    assert_balanced(&composed);
}

#[test]
fn truncated_proof_is_malformed() {
    let config = config();
    let payer = lock(0x22);
    let mut chain = MockChain::new();
    chain.fund(&payer, 1000 * ONE_CKB);

    let request = SporeOutputRequest::new(text_spore(1), lock(0x11));
    let options = ComposeOptions::funded_by(vec![FundingSource::new(payer)]);
    let mut skeleton = create_spore(&chain, &request, &options, &config)
        .expect("created")
        .skeleton;

    let mut proof = skeleton.witnesses()[0].clone();
    proof.truncate(proof.len() - 3);
    skeleton.set_witness(0, proof);
    match find_cobuild_proof(&skeleton) {
        Err(SporeError::MalformedWitness(_)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn identifier_derivation_is_pure() {
    let anchors = [
        OutPoint::new([1; 32], 0),
        OutPoint::new([1; 32], 1),
        OutPoint::new([2; 32], 0),
        OutPoint::new([3; 32], 7),
    ];

    let mut seen = HashSet::new();
    for anchor in &anchors {
        for index in 0..64 {
            let id = derive_type_id(anchor, index);
            assert_eq!(id, derive_type_id(anchor, index));
            assert!(seen.insert(id), "collision at {anchor} / {index}");
        }
    }
}
