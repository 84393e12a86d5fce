use shelfdb::{Db, Object, Result, Schema, Search};

shelfdb::object! {
    #[derive(Debug)]
    pub struct Person {
        pub first_name: String [index],
        pub last_name: String [index],
        pub age: i64 [index],
    }
}

impl Object for Person {}

shelfdb::object! {
    #[derive(Debug)]
    pub struct Registration {
        pub first_name: String [index],
        pub last_name: String [unique],
        pub age: i64 [index],
    }
}

impl Object for Registration {}

fn person(first: &str, last: &str, age: i64) -> Person {
    Person {
        first_name: first.to_string(),
        last_name: last.to_string(),
        age,
        ..Default::default()
    }
}

fn print_people(search: Search<'_, Person>) -> Result<()> {
    let results = search.collect()?;
    println!("Search brought {} results", results.len());
    for p in &results {
        println!("  {} {} ({})", p.first_name, p.last_name, p.age);
    }
    println!();
    Ok(())
}

fn simple(db: &Db) -> Result<()> {
    println!("== searches over indexed fields ==");
    db.create::<Person>(Schema::new())?;

    for (first, last, age) in [
        ("John", "Doe", 42),
        ("John", "Connor", 10),
        ("John", "Lennon", 40),
    ] {
        let mut p = person(first, last, age);
        db.insert_or_update(&mut p)?;
    }

    print_people(db.search("age", ">=", 40))?;
    print_people(db.search("first_name", "=", "John").and("age", "<", 42))?;
    print_people(db.search("last_name", "=", "Connor").or("age", "<", 128))?;
    print_people(db.search("last_name", "=", "Connor").or("last_name", "=", "Doe"))?;

    println!("== regex over a string index ==");
    print_people(db.search("last_name", "~=", "^(?i:do.*)"))?;
    Ok(())
}

fn unique(db: &Db) -> Result<()> {
    println!("== uniqueness constraint ==");
    db.create::<Registration>(Schema::new())?;

    let mut john = Registration {
        first_name: "John".to_string(),
        last_name: "Lennon".to_string(),
        age: 40,
        ..Default::default()
    };
    db.insert_or_update(&mut john)?;

    let mut alfred = Registration {
        first_name: "Alfred".to_string(),
        last_name: "Lennon".to_string(),
        age: 10,
        ..Default::default()
    };
    match db.insert_or_update(&mut alfred) {
        Err(e) if e.is_unique() => {
            println!(
                "{} {} cannot be added, last name is taken\n",
                alfred.first_name, alfred.last_name
            )
        }
        other => other?,
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let root = "./data/database";
    let _ = std::fs::remove_dir_all(root);

    let db = Db::open(root);
    log::info!("database opened at {root}");

    simple(&db)?;
    unique(&db)?;

    db.close()
}
