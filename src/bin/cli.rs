use std::fs;

use clap::{Parser, Subcommand, ValueEnum};

use fee_portal::client::{ClientError, PortalClient};
use fee_portal::models::{PaymentMethod, StudentView};
use fee_portal::payments::PaymentRequest;
use fee_portal::roster::{RosterFilter, StatusFilter};

const TOKEN_FILE: &str = ".fee_portal_token";

#[derive(Parser)]
#[command(name = "fee-cli")]
#[command(about = "CLI for the student fee portal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:5000")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    /// Show the logged-in student
    Me,
    /// List all students
    Students {
        #[arg(short, long, default_value = "")]
        search: String,
        #[arg(long, default_value = "all")]
        status: StatusFilter,
    },
    /// Update name and/or email
    Profile {
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        email: Option<String>,
    },
    Pay {
        #[arg(short, long)]
        amount: f64,
        #[arg(short, long, value_enum, default_value = "credit")]
        method: MethodArg,
        #[arg(long)]
        card_number: Option<String>,
        #[arg(long)]
        expiry: Option<String>,
        #[arg(long)]
        cvv: Option<String>,
        #[arg(long)]
        cardholder: Option<String>,
    },
    History,
    /// Follow payment updates live
    Watch {
        #[arg(long, default_value = "all")]
        status: StatusFilter,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Credit,
    Debit,
    Upi,
}

impl From<MethodArg> for PaymentMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Credit => PaymentMethod::Credit,
            MethodArg::Debit => PaymentMethod::Debit,
            MethodArg::Upi => PaymentMethod::Upi,
        }
    }
}

fn saved_client(url: &str) -> PortalClient {
    let client = PortalClient::new(url);
    match fs::read_to_string(TOKEN_FILE) {
        Ok(token) if !token.trim().is_empty() => client.with_token(token.trim()),
        _ => client,
    }
}

fn print_student(student: &StudentView) {
    let status = if student.fees_paid { "paid" } else { "unpaid" };
    println!("{}  {:<24} {:<32} {}", student.id, student.name, student.email, status);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut client = saved_client(&cli.url);

    match cli.command {
        Commands::Register { name, email, password } => {
            let session = client.register(&name, &email, &password).await?;
            fs::write(TOKEN_FILE, &session.token)?;
            println!("Registered {}. Token saved to {}", session.student.email, TOKEN_FILE);
        }
        Commands::Login { email, password } => match client.login(&email, &password).await {
            Ok(session) => {
                fs::write(TOKEN_FILE, &session.token)?;
                println!("Logged in. Token saved to {}", TOKEN_FILE);
            }
            Err(ClientError::Api { message, .. }) => println!("Login failed: {}", message),
            Err(e) => return Err(e.into()),
        },
        Commands::Logout => {
            client.logout();
            let _ = fs::remove_file(TOKEN_FILE);
            println!("Logged out (token removed).");
        }
        Commands::Me => print_student(&client.me().await?),
        Commands::Students { search, status } => {
            let filter = RosterFilter { search, status };
            let students = client.list_students().await?;
            let shown: Vec<_> = students.iter().filter(|s| filter.matches(s)).collect();
            for student in &shown {
                print_student(student);
            }
            println!("{} of {} students", shown.len(), students.len());
        }
        Commands::Profile { name, email } => {
            let student = client.update_profile(name.as_deref(), email.as_deref()).await?;
            print_student(&student);
        }
        Commands::Pay { amount, method, card_number, expiry, cvv, cardholder } => {
            let request = PaymentRequest {
                amount,
                payment_method: method.into(),
                card_number,
                expiry_date: expiry,
                cvv,
                cardholder_name: cardholder,
            };
            let receipt = client.process_payment(&request).await?;
            println!("Payment successful. Transaction {}", receipt.transaction_id);
        }
        Commands::History => {
            for record in client.payment_history().await? {
                println!(
                    "{}  {:>10.2}  {:<6}  {}",
                    record.date.format("%Y-%m-%d %H:%M"),
                    record.amount,
                    record.payment_method.to_string(),
                    record.transaction_id
                );
            }
        }
        Commands::Watch { status } => {
            let filter = RosterFilter::status(status);
            let mut roster = client.open_roster().await?;
            let counts = roster.roster().counts();
            println!("{} students, {} paid, {} unpaid. Waiting for payments...", counts.total, counts.paid, counts.unpaid);

            loop {
                tokio::select! {
                    update = roster.next() => {
                        let Some(update) = update else {
                            println!("Connection closed.");
                            break;
                        };
                        let counts = roster.roster().counts();
                        println!("{} <{}> paid. Now {} paid, {} unpaid.", update.name, update.email, counts.paid, counts.unpaid);
                        for student in roster.roster().view(&filter) {
                            print_student(student);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        roster.close().await;
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
