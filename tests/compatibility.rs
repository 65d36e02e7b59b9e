// SPDX-License-Identifier: MIT
//! Schema evolution: buffers written with one field set, read with another

use zerobuf::{root_as_table, Builder, Schema, Table};

/// Writer that only knows fields {0, 1}
fn write_v1(hp: i32, name: &str) -> Vec<u8> {
    let mut builder = Builder::new();
    let name = builder.create_string(name).unwrap();
    builder.start_table(2).unwrap();
    builder.add_field(0, hp, 100).unwrap();
    builder.add_offset_field(1, name).unwrap();
    let root = builder.end_table().unwrap();
    builder.finish(root).unwrap();
    builder.into_finished().unwrap()
}

/// Writer that knows fields {0, 1, 2}
fn write_v2(hp: i32, name: &str, mana: u16) -> Vec<u8> {
    let mut builder = Builder::new();
    let name = builder.create_string(name).unwrap();
    builder.start_table(3).unwrap();
    builder.add_field(0, hp, 100).unwrap();
    builder.add_offset_field(1, name).unwrap();
    builder.add_field(2, mana, 150).unwrap();
    let root = builder.end_table().unwrap();
    builder.finish(root).unwrap();
    builder.into_finished().unwrap()
}

struct PlayerV1 {
    hp: i32,
    name: Option<String>,
}

fn read_v1(table: Table<'_>) -> PlayerV1 {
    PlayerV1 {
        hp: table.get_or::<i32>(0, 100).unwrap(),
        name: table.get_str(1).unwrap().map(str::to_string),
    }
}

struct PlayerV2 {
    hp: i32,
    name: Option<String>,
    mana: u16,
}

fn read_v2(table: Table<'_>) -> PlayerV2 {
    PlayerV2 {
        hp: table.get_or::<i32>(0, 100).unwrap(),
        name: table.get_str(1).unwrap().map(str::to_string),
        mana: table.get_or::<u16>(2, 150).unwrap(),
    }
}

#[test]
fn test_new_reader_old_buffer() {
    let data = write_v1(42, "Ayla");
    let table = root_as_table(&data).unwrap();
    assert_eq!(table.vtable().num_fields(), 2);

    let player = read_v2(table);
    assert_eq!(player.hp, 42);
    assert_eq!(player.name.as_deref(), Some("Ayla"));
    assert_eq!(player.mana, 150);
}

#[test]
fn test_old_reader_new_buffer() {
    let data = write_v2(7, "Brom", 999);
    let player = read_v1(root_as_table(&data).unwrap());
    assert_eq!(player.hp, 7);
    assert_eq!(player.name.as_deref(), Some("Brom"));
}

#[test]
fn test_deprecated_field_left_unwritten() {
    // v3 stops writing field 1 but keeps its id reserved
    let mut builder = Builder::new();
    builder.start_table(3).unwrap();
    builder.add_field(0, 5i32, 100).unwrap();
    builder.add_field(2, 20u16, 150).unwrap();
    let root = builder.end_table().unwrap();
    builder.finish(root).unwrap();
    let data = builder.into_finished().unwrap();

    let old = read_v1(root_as_table(&data).unwrap());
    assert_eq!(old.hp, 5);
    assert_eq!(old.name, None);

    let new = read_v2(root_as_table(&data).unwrap());
    assert_eq!(new.mana, 20);
}

#[test]
fn test_schema_reader_across_versions() {
    let v2 = Schema::from_json(
        r#"{ "root_table": "Player", "tables": [ { "name": "Player", "fields": [
            { "name": "hp", "id": 0, "type": "int", "default": 100 },
            { "name": "name", "id": 1, "type": "string" },
            { "name": "mana", "id": 2, "type": "ushort", "default": 150 }
        ] } ] }"#,
    )
    .unwrap();

    let old = write_v1(100, "Cid");
    let player = v2.root(&old).unwrap();
    assert_eq!(player.field("hp").unwrap().as_i64(), Some(100));
    assert!(!player.has("hp").unwrap());
    assert_eq!(player.get_str("name").unwrap(), Some("Cid"));
    assert_eq!(player.field("mana").unwrap().as_u64(), Some(150));

    let newer = write_v2(1, "Dax", 3);
    let player = v2.root(&newer).unwrap();
    assert_eq!(player.field("mana").unwrap().as_u64(), Some(3));
}
