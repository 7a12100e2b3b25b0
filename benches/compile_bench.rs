use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tomb::{compile, Parser, Scanner};

const TOKEN_CONTRACT: &str = r#"
    description PaidDesc {
        code(amount:number): string {
            return "received " + amount;
        }
    }

    contract Token {
        import Map;
        import Runtime;

        global balances : storage_map<address, number>;
        const NAME : string = "Benchmark Token";

        event Paid : number = PaidDesc;

        constructor(owner:address) {
            return;
        }

        public transfer(from:address, to:address, amount:number) {
            Runtime.expect(Runtime.isWitness(from), "invalid witness");
            local current : number := balances.get(from);
            Runtime.expect(current >= amount, "insufficient balance");
            balances.set(from, current - amount);
            balances.set(to, balances.get(to) + amount);
            emit Paid(to, amount);
        }

        public balance(account:address): number {
            return balances.get(account);
        }
    }
"#;

fn lexer_benchmark(c: &mut Criterion) {
    c.bench_function("tokenize token contract", |b| {
        b.iter(|| {
            let mut scanner = Scanner::new(black_box(TOKEN_CONTRACT));
            scanner.scan_tokens().unwrap()
        })
    });
}

fn parser_benchmark(c: &mut Criterion) {
    let tokens = Scanner::new(TOKEN_CONTRACT).scan_tokens().unwrap();
    c.bench_function("parse token contract", |b| {
        b.iter(|| Parser::new(black_box(tokens.clone())).parse().unwrap())
    });
}

fn compile_benchmark(c: &mut Criterion) {
    c.bench_function("compile token contract", |b| {
        b.iter(|| compile(black_box(TOKEN_CONTRACT)).unwrap())
    });
}

criterion_group!(benches, lexer_benchmark, parser_benchmark, compile_benchmark);
criterion_main!(benches);
