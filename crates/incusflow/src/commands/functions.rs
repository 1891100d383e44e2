use colored::Colorize;
use incusflow_converge::Registry;

pub fn handle() {
    println!("{}", "ステート関数:".bold());
    let mut group = "";
    for &name in Registry::FUNCTIONS {
        let prefix = name.split('_').next().unwrap_or(name);
        if prefix != group {
            println!();
            group = prefix;
        }
        println!("  {}", name.cyan());
    }
}
