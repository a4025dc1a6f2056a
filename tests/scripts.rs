// Whole scripts run through a Context

use garnet_core::{Context, Error};
use pretty_assertions::assert_eq;

fn run(source: &str) -> String {
    let ctx = Context::new();
    let outcome = ctx.load_string(source, ());
    match outcome {
        Ok(value) => value.inspect(),
        Err(Error::Runtime { class, message, .. }) => format!("{}: {}", class, message),
        Err(other) => format!("{:?}", other),
    }
}

#[test]
fn classes_with_inheritance_and_super() {
    let source = r##"
class Animal
  attr_reader :name

  def initialize(name)
    @name = name
  end

  def speak
    "..."
  end

  def to_s
    "#{name} says #{speak}"
  end
end

class Dog < Animal
  def speak
    "Woof"
  end
end

class Puppy < Dog
  def speak
    super + "!"
  end
end

[Dog.new("Rex").to_s, Puppy.new("Bit").to_s, Puppy.ancestors.include?(Animal)]
"##;
    assert_eq!(run(source), "[\"Rex says Woof\", \"Bit says Woof!\", true]");
}

#[test]
fn modules_as_mixins() {
    let source = r##"
module Greeting
  def greet
    "hi from #{self.class}"
  end
end

class Robot
  include Greeting
end

Robot.new.greet
"##;
    assert_eq!(run(source), "\"hi from Robot\"");
}

#[test]
fn closures_capture_their_environment() {
    let source = r##"
def counter
  count = 0
  increment = lambda { count += 1 }
  3.times { increment.call }
  count
end

counter
"##;
    assert_eq!(run(source), "3");
}

#[test]
fn iterators_and_collections() {
    let source = r##"
words = ["pear", "apple", "fig", "apple"]
counts = words.tally
longest = words.max_by { |w| w.length }
[counts, longest, words.uniq.sort, (1..10).select(&:even?).sum]
"##;
    assert_eq!(
        run(source),
        "[{\"pear\" => 1, \"apple\" => 2, \"fig\" => 1}, \"apple\", [\"apple\", \"fig\", \"pear\"], 30]"
    );
}

#[test]
fn exceptions_rescue_and_ensure() {
    let source = r##"
log = []
attempts = 0
while attempts < 3
  attempts += 1
  begin
    raise ArgumentError, "flaky" if attempts < 3
    log << :done
  rescue ArgumentError => e
    log << e.message
  ensure
    log << attempts
  end
end
log
"##;
    assert_eq!(run(source), "[\"flaky\", 1, \"flaky\", 2, :done, 3]");
}

#[test]
fn uncaught_exception_reaches_the_host() {
    assert_eq!(run("1 / 0"), "ZeroDivisionError: divided by 0");
    assert_eq!(
        run("nil.upcase"),
        "NoMethodError: undefined method 'upcase' for nil"
    );
}

#[test]
fn case_when_with_ranges_and_classes() {
    let source = r##"
def describe(x)
  case x
  when Integer then x < 0 ? "negative" : "small"
  when 10..20 then "unreachable"
  when String, Symbol then "text"
  else "other"
  end
end

[describe(-1), describe(5), describe("a"), describe(:b), describe(1.5)]
"##;
    assert_eq!(
        run(source),
        "[\"negative\", \"small\", \"text\", \"text\", \"other\"]"
    );
}

#[test]
fn string_building() {
    let source = r##"
name = "garnet"
parts = [name.capitalize, name.length.to_s, name.reverse]
"%s-%d" % [parts.join(" "), 7]
"##;
    assert_eq!(run(source), "\"Garnet 6 tenrag-7\"");
}

#[test]
fn case_equality_operator() {
    let source = r##"
[Integer === 3, String === 3, (1..10) === 2.5, 3 === 3]
"##;
    assert_eq!(run(source), "[true, false, true, true]");
}
