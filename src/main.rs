use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use eyre::{Result, bail};
use rosterstore::{Config, Filter, Record, RecordStore, SyncController, join_errors, parse_flexible_date};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "rosterstore")]
#[command(about = "RosterStore CLI - Flat-file student roster with auto save/reload")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Roster file (default: data_file from the config, else ./students.txt)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List students
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Only show students with a field containing this text
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Show one student
    Show { id: i64 },

    /// Add a student
    Add {
        #[arg(long)]
        id: i64,

        #[arg(long)]
        age: i32,

        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Update a student; fields not given keep their stored value
    Update {
        /// Id of the stored student
        original_id: i64,

        /// New id
        #[arg(long)]
        id: Option<i64>,

        #[arg(long)]
        age: Option<i32>,

        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Delete a student
    Delete { id: i64 },

    /// Rewrite the file in the current format
    Migrate,

    /// Keep the file in sync and report external changes
    Watch {
        /// Stop after this many seconds (default: run until interrupted)
        #[arg(long = "for", value_name = "SECS")]
        duration: Option<u64>,
    },
}

#[derive(Args)]
struct FieldArgs {
    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    address: Option<String>,

    #[arg(long)]
    course: Option<String>,

    /// Birthday (YYYY-MM-DD, MM/DD/YYYY, "Jan 2, 2003", ...); empty clears it
    #[arg(long)]
    birthday: Option<String>,

    #[arg(long)]
    email: Option<String>,
}

impl FieldArgs {
    fn apply(self, record: &mut Record) -> Result<()> {
        if let Some(name) = self.name {
            record.full_name = name;
        }
        if let Some(address) = self.address {
            record.address = address;
        }
        if let Some(course) = self.course {
            record.course_year = course;
        }
        if let Some(birthday) = self.birthday {
            record.birthday = parse_birthday(&birthday)?;
        }
        if let Some(email) = self.email {
            record.email = email;
        }
        Ok(())
    }
}

fn parse_birthday(text: &str) -> Result<Option<chrono::NaiveDate>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    match parse_flexible_date(text) {
        Some(date) => Ok(Some(date)),
        None => bail!("Unrecognized birthday: {}", text),
    }
}

fn main() -> Result<()> {
    // Setup tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let data_file = match cli.file {
        Some(path) => path,
        None => config.resolve_data_file(),
    };

    let mut store = RecordStore::open(&data_file)?;

    match cli.command {
        Commands::List { json, query } => {
            let filter = Filter::new(query.as_deref().unwrap_or(""));
            let records = store.search(&filter);
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_table(&records);
                println!("{} of {} students", records.len(), store.len());
            }
        }
        Commands::Show { id } => match store.find_by_id(id) {
            Some(record) => print_record(record),
            None => println!("{}", format!("Student not found: {}", id).red()),
        },
        Commands::Add { id, age, fields } => {
            let mut record = Record::new(id, "", age);
            fields.apply(&mut record)?;

            let errors = RecordStore::validate(&record, true, Some(&store), None);
            if !errors.is_empty() {
                bail!("{}", join_errors(&errors));
            }
            store.add(record)?;
            store.save()?;
            println!("{} student {}", "Added".green(), id);
        }
        Commands::Update {
            original_id,
            id,
            age,
            fields,
        } => {
            let Some(stored) = store.find_by_id(original_id) else {
                bail!("Student not found: {}", original_id);
            };
            let mut record = stored.clone();
            if let Some(id) = id {
                record.id = id;
            }
            if let Some(age) = age {
                record.age = age;
            }
            fields.apply(&mut record)?;

            let errors = RecordStore::validate(&record, false, Some(&store), Some(original_id));
            if !errors.is_empty() {
                bail!("{}", join_errors(&errors));
            }
            let new_id = record.id;
            store.update(original_id, record)?;
            store.save()?;
            println!("{} student {}", "Updated".green(), new_id);
        }
        Commands::Delete { id } => {
            if !store.delete(id) {
                bail!("Student not found: {}", id);
            }
            store.save()?;
            println!("{} student {}", "Deleted".green(), id);
        }
        Commands::Migrate => {
            store.save()?;
            println!(
                "Rewrote {} students to {}",
                store.len(),
                store.path().display()
            );
        }
        Commands::Watch { duration } => {
            let mut controller = SyncController::attach(store, config.sync);
            println!("{}", controller.attached_notice().to_string().cyan());
            controller.on_notice(|notice| println!("{}", notice.to_string().yellow()));

            let started = Instant::now();
            let limit = duration.map(Duration::from_secs);
            controller.run_until(|_| limit.is_some_and(|limit| started.elapsed() >= limit));
            controller.close();
        }
    }

    Ok(())
}

fn print_table(records: &[&Record]) {
    println!(
        "{}",
        format!(
            "{:>6}  {:<24} {:>3}  {:<20} {:<10} {:<10}  {}",
            "ID", "NAME", "AGE", "ADDRESS", "COURSE", "BIRTHDAY", "EMAIL"
        )
        .bold()
    );
    for r in records {
        println!(
            "{:>6}  {:<24} {:>3}  {:<20} {:<10} {:<10}  {}",
            r.id,
            r.full_name,
            r.age,
            r.address,
            r.course_year,
            r.birthday_iso(),
            r.email
        );
    }
}

fn print_record(record: &Record) {
    println!("{:<10} {}", "ID:".bold(), record.id);
    println!("{:<10} {}", "Name:".bold(), record.full_name);
    println!("{:<10} {}", "Age:".bold(), record.age);
    println!("{:<10} {}", "Address:".bold(), record.address);
    println!("{:<10} {}", "Course:".bold(), record.course_year);
    println!("{:<10} {}", "Birthday:".bold(), record.birthday_iso());
    println!("{:<10} {}", "Email:".bold(), record.email);
}
