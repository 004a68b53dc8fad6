use proptest::prelude::*;
use zirp::{Engine, EngineConfig, MixerId};

fn chain(e: &mut Engine, volumes: &[f32]) -> Vec<MixerId> {
    let mut ids = Vec::new();
    let mut parent = None;
    for (i, &v) in volumes.iter().enumerate() {
        let id = e.new_mixer(&format!("m{i}"), parent).unwrap();
        e.set_mixer_volume(id, v).unwrap();
        ids.push(id);
        parent = Some(id);
    }
    ids
}

#[test]
fn nested_volumes_multiply() {
    let mut e = Engine::new(EngineConfig::default().with_max_nodes(8)).unwrap();
    let ids = chain(&mut e, &[0.5, 0.5]);
    assert_eq!(e.mixer_mixed_volume(ids[1]).unwrap(), 0.25);
    e.set_mixer_volume(ids[0], 0.2).unwrap();
    assert!((e.mixer_mixed_volume(ids[1]).unwrap() - 0.1).abs() < 1.0e-6);
}

proptest! {
    #[test]
    fn mixed_volume_is_the_product_of_ancestors(
        volumes in prop::collection::vec(0.0f32..=1.0, 1..6),
        change in 0usize..6,
        new_volume in 0.0f32..=1.0,
    ) {
        let mut e = Engine::new(EngineConfig::default().with_max_nodes(8)).unwrap();
        let ids = chain(&mut e, &volumes);
        let product: f32 = volumes.iter().product();
        let last = *ids.last().unwrap();
        prop_assert!((e.mixer_mixed_volume(last).unwrap() - product).abs() < 1.0e-5);

        let change = change % ids.len();
        e.set_mixer_volume(ids[change], new_volume).unwrap();
        let mut volumes = volumes;
        volumes[change] = new_volume;
        let product: f32 = volumes.iter().product();
        prop_assert!((e.mixer_mixed_volume(last).unwrap() - product).abs() < 1.0e-5);
    }

    #[test]
    fn pause_reaches_every_descendant(depth in 1usize..6, paused_at in 0usize..6) {
        let mut e = Engine::new(EngineConfig::default().with_max_nodes(8)).unwrap();
        let ids = chain(&mut e, &vec![1.0; depth]);
        let paused_at = paused_at % depth;
        e.set_mixer_paused(ids[paused_at], true).unwrap();
        for (i, &id) in ids.iter().enumerate() {
            prop_assert_eq!(e.mixer_mixed_paused(id).unwrap(), i >= paused_at);
        }
        e.set_mixer_paused(ids[paused_at], false).unwrap();
        for &id in &ids {
            prop_assert!(!e.mixer_mixed_paused(id).unwrap());
        }
    }
}
